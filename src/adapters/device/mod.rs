pub mod mock;
pub mod tool_gateway;

pub use mock::MockDeviceGateway;
pub use tool_gateway::BackupToolGateway;
