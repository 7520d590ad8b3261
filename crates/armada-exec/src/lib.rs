pub mod credentials;
pub mod executor;
pub mod factory;
pub mod local;
pub mod ssh;

pub use credentials::{Credential, CredentialStore};
pub use executor::{shell_quote, CommandOutput, ExecError, RemoteExecutor};
pub use factory::{primary_local_ip, DefaultExecutorFactory, ExecutorFactory};
pub use local::LocalExecutor;
pub use ssh::SshExecutor;
