//! 工具层：注册表、参数 schema 校验、执行器与具体工具（echo / 航班搜索 / 日历查询）

pub mod backend;
pub mod calendar;
pub mod echo;
pub mod executor;
pub mod flight_search;
pub mod registry;
pub mod schema;

pub use backend::HttpBackend;
pub use calendar::{CalendarQueryArgs, CalendarQueryTool};
pub use echo::EchoTool;
pub use executor::{InvocationContext, ToolExecutor, ToolOutcome};
pub use flight_search::{FlightSearchArgs, FlightSearchTool};
pub use registry::{Tool, ToolRegistry, ToolSummary};
pub use schema::{schema_of, validate_arguments};
