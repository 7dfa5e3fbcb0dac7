pub mod agentgateway;
