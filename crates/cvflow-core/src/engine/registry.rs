use super::action::{ActionKernel, ActionNode, ActionParts};
use super::error::EngineError;
use super::keywords::{Keywords, ParsedKeywords};
use crate::core::models::ids::{ActionId, ValueRef};
use crate::core::models::value::Value;
use crate::core::structure::reference::ReferenceStructure;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub type Constructor =
    Arc<dyn Fn(&BuildContext<'_>, &ParsedKeywords) -> Result<ActionParts, EngineError> + Send + Sync>;

/// What an action constructor can see of the graph built so far.
pub struct BuildContext<'a> {
    pub(crate) label: &'a str,
    pub(crate) nodes: &'a [ActionNode],
    pub(crate) labels: &'a HashMap<String, ActionId>,
    /// Labels of the actions later in the script, with their upper-case type names.
    pub(crate) pending: &'a HashMap<String, String>,
    pub(crate) natoms: usize,
    pub(crate) structures: &'a HashMap<String, Arc<ReferenceStructure>>,
}

impl<'a> BuildContext<'a> {
    pub fn label(&self) -> &str {
        self.label
    }

    pub fn natoms(&self) -> usize {
        self.natoms
    }

    fn node(&self, label: &str) -> Result<&'a ActionNode, EngineError> {
        match self.labels.get(label) {
            Some(id) => Ok(&self.nodes[id.index()]),
            None if self.pending.contains_key(label) => Err(EngineError::ordering(
                self.label,
                format!("argument '{label}' is defined after this action"),
            )),
            None => Err(EngineError::configuration(
                self.label,
                format!("there is no action labelled '{label}'"),
            )),
        }
    }

    /// Resolves `label`, `label.component` or `label.*` into value references.
    pub fn resolve(&self, name: &str) -> Result<Vec<ValueRef>, EngineError> {
        if let Some(label) = name.strip_suffix(".*") {
            let node = self.node(label)?;
            if node.values().is_empty() {
                return Err(EngineError::configuration(
                    self.label,
                    format!("action '{label}' has no values"),
                ));
            }
            return Ok((0..node.values().len())
                .map(|c| ValueRef::new(node.id(), c))
                .collect());
        }

        let label = name.split_once('.').map_or(name, |(l, _)| l);
        let node = self.node(label)?;
        match component_of(node, name, label) {
            Some(c) => Ok(vec![ValueRef::new(node.id(), c)]),
            None if name == label => Err(EngineError::configuration(
                self.label,
                format!("action '{label}' has no values"),
            )),
            None => Err(EngineError::configuration(
                self.label,
                format!("action '{label}' has no component '{name}'"),
            )),
        }
    }

    /// Resolves every entry of a keyword into value references, in order.
    pub fn arguments(&self, keywords: &ParsedKeywords, key: &str) -> Result<Vec<ValueRef>, EngineError> {
        let mut refs = Vec::new();
        for name in keywords.texts(key) {
            refs.extend(self.resolve(&name)?);
        }
        Ok(refs)
    }

    pub fn value(&self, r: ValueRef) -> Option<&'a Value> {
        self.nodes.get(r.action.index())?.value(r.component)
    }

    /// The most recent earlier action whose kernel has type `T`.
    pub fn latest<T: ActionKernel + 'static>(&self) -> Option<&'a T> {
        self.nodes.iter().rev().find_map(|n| n.kernel_as::<T>())
    }

    /// Whether an action of type `name` appears later in the script.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.values().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn structure(&self, name: &str) -> Result<Arc<ReferenceStructure>, EngineError> {
        self.structures.get(name).cloned().ok_or_else(|| {
            EngineError::configuration(self.label, format!("no reference structure named '{name}'"))
        })
    }
}

/// Component addressed by `name`: an exact match, or the first component for a bare label.
pub(crate) fn component_of(node: &ActionNode, name: &str, label: &str) -> Option<usize> {
    let values = node.values();
    values
        .iter()
        .position(|v| v.name() == name)
        .or_else(|| (name == label && !values.is_empty()).then_some(0))
}

#[derive(Clone)]
pub struct RegisteredAction {
    keywords: Keywords,
    constructor: Constructor,
}

impl RegisteredAction {
    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    pub(crate) fn construct(
        &self,
        ctx: &BuildContext<'_>,
        keywords: &ParsedKeywords,
    ) -> Result<ActionParts, EngineError> {
        (self.constructor)(ctx, keywords)
    }
}

/// Maps action type names to their keyword schema and constructor.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, RegisteredAction>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::actions::register_builtins(&mut registry);
        registry
    }

    pub(crate) fn insert<F>(&mut self, keywords: Keywords, constructor: F)
    where
        F: Fn(&BuildContext<'_>, &ParsedKeywords) -> Result<ActionParts, EngineError> + Send + Sync + 'static,
    {
        self.actions.insert(
            keywords.action.to_string(),
            RegisteredAction {
                keywords,
                constructor: Arc::new(constructor),
            },
        );
    }

    pub fn register<F>(&mut self, keywords: Keywords, constructor: F) -> Result<(), EngineError>
    where
        F: Fn(&BuildContext<'_>, &ParsedKeywords) -> Result<ActionParts, EngineError> + Send + Sync + 'static,
    {
        if self.actions.contains_key(keywords.action) {
            return Err(EngineError::DuplicateRegistration(keywords.action.to_string()));
        }
        self.insert(keywords, constructor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredAction> {
        self.actions.get(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}
