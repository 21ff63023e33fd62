//! # keymap_sync: Keymap DSL and Visual Model Sync Engine
//!
//! Keeps a keyboard-remapping script and its visual key-mapping model in
//! agreement: a PEST grammar and parser for the DSL, a projector from the AST
//! to per-scope, per-layer key maps, a serializer back to canonical text, and
//! a debounced sync controller that rejects stale parse results.
//!
//! ## DSL structure
//!
//! - **Imports**: `import "common.rhai";`
//! - **Global mappings and layers**: statements outside any block
//! - **Device blocks**: `device("SN-001") { ... }` scoped by serial, id or `*` glob
//! - **Layers**: `layer("nav") { ... }`, globally or inside a device block
//!
//! ## Mapping statements
//!
//! - `map(src, dst)`
//! - `map(src, with_shift(dst))`, also `with_ctrl`, `with_alt`, `with_win`
//! - `with_mods(src, dst, shift, ctrl, alt, win)` with boolean flags
//! - `tap_hold(src, tap, hold, threshold_ms)`
//! - `layer_switch(src, layer)`
//! - `macro(src, [press(k), release(k), tap(k), wait(ms)])`
//!
//! ## Example DSL
//!
//! ```text
//! import "common.rhai";
//!
//! map("CapsLock", "Escape");
//! layer("nav") {
//!     map("H", "Left");
//! }
//!
//! device("SN-001") {
//!     tap_hold("Space", "Space", "MD_00", 200);
//! }
//! ```
//!
//! ## Usage
//!
//! ```
//! use keymap_sync::{parse, project, serialize, Mapping, Scope, VisualEdit, BASE_LAYER};
//!
//! let ast = parse("map(\"A\", \"B\");").unwrap();
//! let mut model = project(&ast, &[]);
//! model
//!     .apply(VisualEdit::SetMapping {
//!         scope: Scope::Global,
//!         layer: BASE_LAYER.to_string(),
//!         mapping: Mapping::simple("C", "D"),
//!     })
//!     .unwrap();
//! let out = serialize(&model, &ast).unwrap();
//! assert_eq!(out.source, "map(\"A\", \"B\");\nmap(\"C\", \"D\");\n");
//! ```
//!
//! See `tests/integration.rs` for the controller's debounce and stale-result
//! behaviour.

pub mod ast;
pub mod config;
pub mod controller;
pub mod devices;
pub mod diagnostics;
pub mod error;
pub mod keys;
pub mod lint;
pub mod parser;
pub mod project;
pub mod render;
pub mod serialize;
pub mod storage;
pub mod visual;

pub use ast::{Action, Ast, Comment, DeviceBlock, Layer, MacroStep, Mapping};
pub use config::EngineConfig;
pub use controller::{ConfigParser, DslParser, ParseOutcome, ParseResult, ParseTicket, SyncController, SyncState};
pub use devices::{DeviceInfo, DeviceRegistry, JsonDeviceRegistry, StaticDeviceRegistry};
pub use diagnostics::{check, CheckOptions, Diagnostic, DiagnosticSet, DiagnosticSource, Severity};
pub use error::{ConfigError, EditError, ParseError, RegistryError, SerializeError, StoreError, SyncError};
pub use parser::parse;
pub use project::project;
pub use render::format_source;
pub use serialize::{serialize, Serialized};
pub use storage::{FsProfileStore, LoadedConfig, MemoryProfileStore, ProfileStore};
pub use visual::{Scope, VisualEdit, VisualModel, BASE_LAYER};
