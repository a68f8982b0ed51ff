//! The navigation engine: visits, history, snapshot caching, rendering,
//! frames and streams, composed by [`Session`].

pub mod cache;
pub mod config;
pub mod delegate;
pub mod form;
pub mod frame;
pub mod history;
pub mod navigator;
pub mod observers;
pub mod prefetch;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod stream;
pub mod view;
pub mod visit;

pub use cache::SnapshotCache;
pub use config::DriveConfig;
pub use delegate::Disposition;
pub use delegate::DriveDelegate;
pub use delegate::DriveEvent;
pub use delegate::NullDelegate;
pub use delegate::RecordingDelegate;
pub use delegate::RenderInfo;
pub use frame::FrameController;
pub use history::History;
pub use history::HistoryMethod;
pub use history::ScrollPosition;
pub use observers::ClickInput;
pub use render::RenderStrategy;
pub use scheduler::Clock;
pub use scheduler::ManualClock;
pub use scheduler::SystemClock;
pub use session::HardReload;
pub use session::Session;
pub use session::SessionBuilder;
pub use snapshot::Snapshot;
pub use stream::StreamAction;
pub use visit::Visit;
pub use visit::VisitAction;
pub use visit::VisitOptions;
pub use visit::VisitState;
