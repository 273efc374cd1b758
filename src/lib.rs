//! ij-devkit - IntelliJ platform plugin build environment
//!
//! Resolves the platform distribution, plugins and runtime a plugin build
//! needs, fetches them into a shared machine-wide cache, composes an
//! isolated IDE sandbox from them and verifies that the plugin under test
//! is compatible with what was assembled.

pub mod catalog;
pub mod config;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod initialize;
pub mod pipeline;
pub mod platform;
pub mod resolver;
pub mod sandbox;
pub mod verifier;

pub use catalog::{JetbrainsCatalog, ReleaseCatalog, StaticCatalog};
pub use config::{BuildConfig, EffectiveConfig};
pub use dependency::PluginDependency;
pub use descriptor::{PluginDescriptor, PluginManifest};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{prepare, PrepareOptions, PreparedSandbox};
pub use platform::{HostPlatform, PlatformType};
pub use resolver::{Resolution, Resolver};
pub use sandbox::{ComposedSandbox, CompositionRequest, SandboxComposer, SandboxLayout};
pub use verifier::{Finding, VerificationReport, Verifier};
