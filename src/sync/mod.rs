pub mod api_client;
pub mod engine;
pub mod scheduler;
pub mod types;

pub use api_client::{HttpContactApiClient, HttpRequest, HttpResponse, HttpSender};
pub use engine::ReconciliationEngine;
pub use scheduler::{ContactDispatcher, DispatchReport, RunScheduler, ScheduleRequest};
pub use types::{
    ApiResult, ChannelIdSource, Clock, ContactApi, ContactApiError, ErrorKind, RunError,
    RunOutcome, RunStatus, SystemClock,
};
