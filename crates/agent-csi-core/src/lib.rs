//! Core types and utilities for the agent CSI driver.
//!
//! This crate provides the pieces every other component builds on:
//!
//! - **Paths**: [`PathResolver`], the single source of the on-disk layout
//! - **Mounts**: the ordered bind-mount engine with rollback and the
//!   [`Mounter`] seam it runs against
//! - **Errors**: [`CsiError`], the domain error every component boundary speaks
//! - **Custom resource**: the [`DynaKube`] resource that declares a tenant
//!
//! # Example
//!
//! ```
//! use agent_csi_core::{Flavor, PathResolver};
//!
//! let paths = PathResolver::new("/data");
//! let bin = paths.agent_binary_dir_for_version("tenant-1", "1.2.3");
//! assert_eq!(bin.to_str(), Some("/data/tenant-1/bin/1.2.3"));
//!
//! let musl = paths.agent_binary_dir_for_flavor("tenant-1", "1.2.3", Flavor::Musl);
//! assert_eq!(musl.to_str(), Some("/data/tenant-1/bin/1.2.3-musl"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dynakube;
pub mod error;
pub mod mount;
pub mod paths;

pub use dynakube::{CodeModulesSpec, DynaKube, DynaKubeSpec};
pub use error::{CsiError, Result};
pub use mount::{bind_mount, bind_unmount, BindMount, MountError, Mounter, SystemMounter};
pub use paths::{Flavor, PathResolver};

#[cfg(any(test, feature = "test-utils"))]
pub use mount::fake::FakeMounter;
