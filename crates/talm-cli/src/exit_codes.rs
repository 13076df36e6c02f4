//! Process exit codes
//!
//! Values below 64 are talm-specific; 64 follows sysexits.h.

#![allow(dead_code)]

pub const SUCCESS: i32 = 0;

/// Unspecified failure
pub const ERROR: i32 = 1;

/// Invalid input: bad flags, malformed modeline, invalid patch or values
pub const INPUT_ERROR: i32 = 2;

/// Template rendering failed (syntax, undefined reference, lookup failure)
pub const TEMPLATE_ERROR: i32 = 3;

/// Chart loading or machine config assembly failed
pub const CONFIG_ERROR: i32 = 4;

/// File not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Encrypted secrets could not be decrypted
pub const DECRYPTION_ERROR: i32 = 6;

/// Render stopped by timeout or cancellation
pub const CANCELLED: i32 = 7;

pub const USAGE_ERROR: i32 = 64;
