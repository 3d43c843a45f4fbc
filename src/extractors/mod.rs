mod actor;

pub use actor::{CurrentActor, ACTOR_ID_HEADER, ACTOR_ROLES_HEADER};
