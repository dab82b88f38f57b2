//! Executors: the named capabilities the dispatch layer can invoke.

pub mod shark;
pub mod state;
pub mod term;
pub mod topo;

pub use shark::SharkExecutor;
pub use state::StateExecutor;
pub use term::TermExecutor;
pub use topo::TopoExecutor;
