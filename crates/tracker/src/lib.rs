//! Storefront behavioral tracking client: identity resolution, session
//! tracking, fire-and-forget event delivery, and batched product impressions.
//!
//! # Modules
//!
//! - [`identity`]: Who is browsing (signed in, guest, anonymous)
//! - [`session`]: Persisted session id and session start/end signals
//! - [`emitter`]: Discrete events (page, product, search, cart, purchase)
//! - [`impressions`]: Visibility state machine and batched impressions
//! - [`product_views`]: Per-session deduplicated product views
//! - [`dispatch`] / [`transport`]: Non-blocking delivery to the tracking API
//! - [`service`]: The [`Tracker`] tying it together

pub mod cart;
pub mod dispatch;
pub mod emitter;
pub mod identity;
pub mod impressions;
pub mod product_views;
pub mod service;
pub mod session;
pub mod transport;

pub use dispatch::Dispatcher;
pub use emitter::EventEmitter;
pub use identity::IdentityResolver;
pub use impressions::ImpressionBatcher;
pub use product_views::ProductViewLog;
pub use service::Tracker;
pub use session::{Session, SessionManager};
pub use transport::{CaptureTransport, Delivery, HttpTransport, NoOpTransport, Transport};
