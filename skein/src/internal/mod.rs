pub(crate) mod item;
pub(crate) mod membership;
pub(crate) mod spin;
pub(crate) mod waiter;
