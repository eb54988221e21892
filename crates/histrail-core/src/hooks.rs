//! Typed lifecycle hook points the host dispatches to.
//!
//! Every hook receives the caller's connection. Hosts that wrap their write
//! in a [`rusqlite::Transaction`] pass it through (it derefs to
//! [`Connection`]), so history rows commit or roll back with the data.

use crate::model::{Actor, ExtraData};
use crate::source::{EntitySource, ObjectRef};
use rusqlite::Connection;

/// Per-call context threaded explicitly from the caller into the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeContext {
    /// Actor set on the instance itself (system jobs, imports).
    pub instance_actor: Option<Actor>,
    /// Actor derived from the surrounding request.
    pub request_actor: Option<Actor>,
    /// Overrides the type's additional-data accessor for this event.
    pub extra_data: Option<ExtraData>,
}

impl ChangeContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_request(actor: Actor) -> Self {
        Self {
            request_actor: Some(actor),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_instance_actor(mut self, actor: Actor) -> Self {
        self.instance_actor = Some(actor);
        self
    }

    #[must_use]
    pub fn with_extra_data(mut self, extra: ExtraData) -> Self {
        self.extra_data = Some(extra);
        self
    }

    /// Instance actor wins over request actor.
    #[must_use]
    pub fn actor(&self) -> Option<&Actor> {
        self.instance_actor.as_ref().or(self.request_actor.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipAction {
    Add,
    Remove,
    Clear,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Pre,
    Post,
}

/// A membership change on a multi-valued relation.
///
/// `members` holds the objects given to the call: the added or removed ones
/// for `Add`/`Remove`, the requested final membership for `Set`, nothing for
/// `Clear`.
#[derive(Debug, Clone, Copy)]
pub struct MembershipEvent<'a> {
    pub owner: &'a ObjectRef,
    pub field: &'a str,
    pub action: MembershipAction,
    pub phase: HookPhase,
    pub members: &'a [ObjectRef],
    pub context: &'a ChangeContext,
}

/// Listener the history controller implements and hosts subscribe.
pub trait LifecycleListener: Send + Sync {
    /// Fired after a create (`created == true`) or update has been applied.
    ///
    /// # Errors
    ///
    /// Store failures are returned to the host unchanged.
    fn after_save(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        object: &ObjectRef,
        created: bool,
        context: &ChangeContext,
    ) -> anyhow::Result<()>;

    /// Fired while the row and its relations are still readable.
    ///
    /// # Errors
    ///
    /// Store failures are returned to the host unchanged.
    fn before_delete(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        object: &ObjectRef,
        context: &ChangeContext,
    ) -> anyhow::Result<()>;

    /// Fired around every membership change.
    ///
    /// # Errors
    ///
    /// Store failures are returned to the host unchanged.
    fn membership_changed(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        event: &MembershipEvent<'_>,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::ChangeContext;
    use crate::model::Actor;

    #[test]
    fn instance_actor_wins_over_request_actor() {
        let ctx = ChangeContext::for_request(Actor::named(1, "web"));
        assert_eq!(ctx.actor().and_then(Actor::display_name), Some("web"));

        let ctx = ctx.with_instance_actor(Actor::named(2, "importer"));
        assert_eq!(
            ctx.actor().and_then(Actor::display_name),
            Some("importer")
        );

        assert!(ChangeContext::anonymous().actor().is_none());
    }
}
