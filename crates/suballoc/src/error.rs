//! Standalone error types for nebula-suballoc
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Running out of space is *not* an error in this crate: `allocate` returns
//! `None` for both capacity and slot-table exhaustion, because callers are
//! expected to plan around it. The variants below cover construction,
//! buffer binding, consistency checks and guard-byte corruption.

use thiserror::Error;
use tracing::error;

use crate::handle::PoolId;

// ============================================================================
// Main Error Types
// ============================================================================

/// Sub-allocator errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Configuration Errors ---
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid memory layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Request of {size} bytes exceeds pool capacity of {capacity} bytes")]
    ExceedsCapacity { size: usize, capacity: usize },

    // --- Binding Errors ---
    #[error("Backing buffer too small: pool needs {required} bytes, buffer has {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    #[error("Pool {pool} has no open access session")]
    AccessRequired { pool: PoolId },

    // --- Lookup Errors ---
    #[error("Pool {pool} is not managed here")]
    PoolNotFound { pool: PoolId },

    // --- Integrity Errors ---
    #[error("Memory corruption detected in {component}: {details}")]
    Corruption { component: String, details: String },
}

impl MemoryError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExceedsCapacity { .. } | Self::AccessRequired { .. })
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::InvalidLayout { .. } => "MEM:ALLOC:LAYOUT",
            Self::ExceedsCapacity { .. } => "MEM:POOL:CAPACITY",
            Self::BufferTooSmall { .. } => "MEM:POOL:BUFFER",
            Self::AccessRequired { .. } => "MEM:POOL:UNMAPPED",
            Self::PoolNotFound { .. } => "MEM:POOL:NOT_FOUND",
            Self::Corruption { .. } => "MEM:SYSTEM:CORRUPTION",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    /// Create invalid pool config error
    pub fn invalid_pool_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: format!("invalid pool config: {reason}"),
        }
    }

    /// Create invalid layout error
    pub fn invalid_layout(reason: &str) -> Self {
        Self::InvalidLayout {
            reason: reason.to_string(),
        }
    }

    /// Create capacity exceeded error
    pub fn exceeds_capacity(size: usize, capacity: usize) -> Self {
        Self::ExceedsCapacity { size, capacity }
    }

    /// Create buffer too small error
    pub fn buffer_too_small(required: usize, provided: usize) -> Self {
        Self::BufferTooSmall { required, provided }
    }

    /// Create access required error
    pub fn access_required(pool: PoolId) -> Self {
        Self::AccessRequired { pool }
    }

    /// Create pool not found error
    pub fn pool_not_found(pool: PoolId) -> Self {
        Self::PoolNotFound { pool }
    }

    /// Create memory corruption error
    pub fn corruption(component: &str, details: &str) -> Self {
        error!(component, details, "memory corruption detected");

        Self::Corruption {
            component: component.to_string(),
            details: details.to_string(),
        }
    }

    /// Check if this is a corruption error
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for sub-allocator operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MemoryError::buffer_too_small(1024, 512);
        assert!(error.to_string().contains("1024"));
        assert!(error.to_string().contains("512"));
    }

    #[test]
    fn test_corruption_errors() {
        let error = MemoryError::corruption("pool", "slot 3 overlaps slot 4");
        assert!(error.is_corruption());
        assert!(error.to_string().contains("slot 3"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MemoryError::invalid_config("x").code(),
            "MEM:CONFIG:INVALID"
        );
        assert_eq!(
            MemoryError::exceeds_capacity(10, 5).code(),
            "MEM:POOL:CAPACITY"
        );
        assert_eq!(
            MemoryError::corruption("guard", "x").code(),
            "MEM:SYSTEM:CORRUPTION"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(MemoryError::exceeds_capacity(2048, 1024).is_retryable());
        assert!(!MemoryError::invalid_pool_config("zero slots").is_retryable());
    }
}
