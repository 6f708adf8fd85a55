//! # screenflow
//!
//! A declarative screen execution engine. It takes a static element tree,
//! a table of calculations, and per-element conditions, and produces a
//! render tree with computed text, resolved visibility, and expanded
//! repeating data.
//!
//! ## Core Systems
//!
//! - **[`dom`]**: Slotmap-backed element arena, serde screen definitions, queries
//! - **[`calc`]**: Step model, value resolver, operator reducer, `{{CALC:..}}` substitution
//! - **[`condition`]**: Ordered first-true-wins visibility rules
//! - **[`expand`]**: Repeating-container and page expansion with row contexts
//! - **[`selection`]**: Active child of tabs and slider containers
//! - **[`session`]**: The Loading → Rendered pipeline with last-trigger-wins commits
//! - **[`source`]**: Row source capability, filters, and the session query cache
//! - **[`env`]**: The evaluation environment passed to every resolver call
//! - **[`config`]**: Engine configuration
//! - **[`testing`]**: In-memory row source and snapshot helpers
//!
//! ## Example
//!
//! ```ignore
//! use screenflow::dom::{AppDefinition, Element, ScreenDefinition};
//! use screenflow::session::Session;
//! use screenflow::testing::MemoryRowSource;
//!
//! let app = AppDefinition::new().with_screen(ScreenDefinition::new(
//!     "home",
//!     vec![Element::text("greeting", "Hello {{CALC:c1}}")],
//! ));
//! let session = Session::new(app, "home", MemoryRowSource::new());
//! let outcome = session.start().await;
//! ```

// Foundation
pub mod config;
pub mod error;
pub mod value;

// Core systems
pub mod dom;
pub mod source;

// Evaluation
pub mod calc;
pub mod condition;
pub mod env;
pub mod expand;
pub mod selection;

// Pipeline
pub mod session;

// Test support
pub mod testing;

pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, QueryError, Result};
pub use session::{Phase, RenderOutput, RunOutcome, Session, Trigger};
pub use value::Value;
