/* 📖 # What lives in rabbit_engine?

Everything between an incoming analysis request and the external engine:
parameter validation, the canonical request string, the bounded-parallelism worker
pool, the Engine seam, and the HTTP service tying them together.
*/

pub mod api;
pub mod engine;
pub mod params;
pub mod pool;
pub mod request;

pub use api::AnalysisService;
pub use engine::{Engine, EngineHandle, Operation, ProcessEngine};
pub use params::{ParameterRecord, validate};
pub use pool::{PoolConfig, ResultHandle, WorkerPool};
pub use request::serialize;
