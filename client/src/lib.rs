// Gas sponsor client
// Network side of the wallet: failover over unreliable RPC endpoints and the
// sponsored-execution protocol against an external gas pool.

pub mod failover;
pub mod rpc;
pub mod sponsor;

pub use failover::{fetch_with_failover, AllEndpointsFailedError, EndpointError};
pub use rpc::RpcClient;
pub use sponsor::{
    is_ambiguous_failure, is_execution_failure_error, is_execution_failure_message,
    should_use_sponsored_gas, HttpSponsorService, SponsorConfig, SponsorError, SponsoredExecutor,
};
