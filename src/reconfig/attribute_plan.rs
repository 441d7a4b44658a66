use std::collections::BTreeMap;

use crate::schema::AttributeSpec;

/// What must happen to the attribute set when moving between two configs.
///
/// Only `populate` entries require a pass over existing documents; every
/// other action is a cheap structural change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeReconfig {
    /// New attributes (or ones with a changed derivation) that must be
    /// filled from stored documents
    pub populate: Vec<AttributeSpec>,
    /// Attributes in history whose derivation is unchanged; revived as is
    pub restore: Vec<String>,
    /// Attributes removed from the config; kept as history until wiped
    pub to_history: Vec<String>,
}

impl AttributeReconfig {
    /// Plan the attribute transition. `history` holds attributes removed by
    /// earlier configs that have not been wiped yet.
    pub fn plan(
        old: &BTreeMap<String, AttributeSpec>,
        new: &BTreeMap<String, AttributeSpec>,
        history: &BTreeMap<String, AttributeSpec>,
    ) -> Self {
        let mut plan = AttributeReconfig::default();
        for (name, spec) in new {
            match old.get(name) {
                Some(current) if !current.derivation_differs(spec) => {}
                Some(_) => plan.populate.push(spec.clone()),
                None => match history.get(name) {
                    Some(kept) if !kept.derivation_differs(spec) => plan.restore.push(name.clone()),
                    _ => plan.populate.push(spec.clone()),
                },
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                plan.to_history.push(name.clone());
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.populate.is_empty() && self.restore.is_empty() && self.to_history.is_empty()
    }

    pub fn needs_reprocessing(&self) -> bool {
        !self.populate.is_empty()
    }
}
