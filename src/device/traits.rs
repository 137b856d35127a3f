use crate::device::actions::ActionArguments;
use crate::errors::{ActionError, SecurityResult};
use crate::identity::Identity;
use crate::tunnel::InnerMessage;

/// Executes actions of services layered on top of the security engine.
///
/// Called only after the caller's signature and permissions were checked;
/// `caller` is `None` for unsigned requests.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(
        &self,
        caller: Option<&Identity>,
        action_name: &str,
        arguments: &ActionArguments,
    ) -> Result<ActionArguments, ActionError>;
}

impl<F> ActionDispatcher for F
where
    F: Fn(Option<&Identity>, &str, &ActionArguments) -> Result<ActionArguments, ActionError> + Send + Sync,
{
    fn dispatch(
        &self,
        caller: Option<&Identity>,
        action_name: &str,
        arguments: &ActionArguments,
    ) -> Result<ActionArguments, ActionError> {
        self(caller, action_name, arguments)
    }
}

/// Answers the HTTP requests unwrapped by `DecryptAndExecute`.
pub trait InnerMessageProcessor: Send + Sync {
    fn process(&self, request: InnerMessage) -> SecurityResult<InnerMessage>;
}

/// Accepts complete, possibly signed, action envelopes.
pub trait SignedActionHandler {
    fn handle_signed(&self, envelope: &str, control_url: &str) -> Result<ActionArguments, ActionError>;
}

pub trait OwnershipAware {
    fn is_owned(&self) -> bool;

    fn owners(&self) -> Vec<Identity>;

    fn is_owner(&self, identity: &Identity) -> bool {
        self.owners().contains(identity)
    }
}
