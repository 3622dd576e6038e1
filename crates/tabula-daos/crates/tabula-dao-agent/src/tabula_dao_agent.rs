//! Agent-proxied data access implementation
//!
//! Some databases are host-managed: the product never dials them
//! directly. Instead a remote agent process sits next to the database and
//! executes contract calls on our behalf. `AgentDao` implements the exact
//! same `DataAccessObject` contract by forwarding each method as a JSON
//! command over an [`AgentChannel`], so callers never branch on
//! "direct vs. agent". The wire transport behind the channel belongs to
//! the agent subsystem, not to this crate.

mod channel;
mod dao;
mod json;

pub use channel::{AgentChannel, AgentCommand, AgentConnector};
pub use dao::{AgentDao, AgentDaoFactory};
pub use json::{json_to_value, value_to_json};
