//! Per-request responders: [`ScopeResponder`] reads, [`ActionResponder`] runs named actions.

mod action;
mod crud;
mod scope;

pub use action::{
    perform_action, ActionContext, ActionHandler, ActionOutput, ActionResponder, ActionSet, ClassAction,
    InstanceAction, PerformOptions,
};
pub use crud::{DeleteAction, SaveAction};
pub use scope::{Pagination, QueryPlan, ScopeProvider, ScopeResponder};
pub(crate) use scope::MissingScope;
