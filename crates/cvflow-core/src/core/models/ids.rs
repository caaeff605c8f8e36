use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    pub struct LeaseKey;
}

/// Position of an action in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub usize);

impl ActionId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-owning handle to one output value of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef {
    pub action: ActionId,
    pub component: usize,
}

impl ValueRef {
    pub fn new(action: ActionId, component: usize) -> Self {
        Self { action, component }
    }
}
