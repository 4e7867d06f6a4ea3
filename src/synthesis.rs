use crate::batch::{BatchCommand, ParameterGenerator};
use crate::error::StoreError;
use crate::types::{Action, ActionKind};

/// Per-entity strategy that turns one item into one statement of a flush batch.
///
/// These three operations are the only place entity structure is known; the engine itself is
/// entity-agnostic. Implementations must:
/// - append exactly one syntactically valid statement per call,
/// - bind every literal value under a name minted from `names` (never a hand-made one),
/// - pass any identifier they interpolate into the text through [`crate::escape::identifier`].
///
/// ```rust
/// use sandbox_store::prelude::*;
///
/// struct Counter;
///
/// impl QuerySynthesis for Counter {
///     type Item = (String, i64);
///
///     fn append_insert(&self, batch: &mut BatchCommand, names: &mut ParameterGenerator, item: &Self::Item) -> Result<(), StoreError> {
///         let (k, v) = (names.next_name(), names.next_name());
///         batch.push(
///             format!("INSERT OR REPLACE INTO counters (name, hits) VALUES ({k}, {v})"),
///             vec![(k, RowValues::Text(item.0.clone())), (v, RowValues::Int(item.1))],
///         )
///     }
///
///     fn append_update(&self, batch: &mut BatchCommand, names: &mut ParameterGenerator, item: &Self::Item) -> Result<(), StoreError> {
///         let (k, v) = (names.next_name(), names.next_name());
///         batch.push(
///             format!("UPDATE counters SET hits = {v} WHERE name = {k}"),
///             vec![(k, RowValues::Text(item.0.clone())), (v, RowValues::Int(item.1))],
///         )
///     }
///
///     fn append_delete(&self, batch: &mut BatchCommand, names: &mut ParameterGenerator, item: &Self::Item) -> Result<(), StoreError> {
///         let k = names.next_name();
///         batch.push(
///             format!("DELETE FROM counters WHERE name = {k}"),
///             vec![(k, RowValues::Text(item.0.clone()))],
///         )
///     }
/// }
/// ```
pub trait QuerySynthesis: Send + Sync + 'static {
    /// The entity type this strategy persists.
    type Item: Send + 'static;

    /// Append an INSERT for `item`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the statement cannot be added to the batch.
    fn append_insert(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &Self::Item,
    ) -> Result<(), StoreError>;

    /// Append an UPDATE for `item`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the statement cannot be added to the batch.
    fn append_update(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &Self::Item,
    ) -> Result<(), StoreError>;

    /// Append a DELETE for `item`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the statement cannot be added to the batch.
    fn append_delete(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &Self::Item,
    ) -> Result<(), StoreError>;

    /// Dispatch on the action kind.
    ///
    /// # Errors
    /// Propagates the error of the selected operation.
    fn append_action(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        action: &Action<Self::Item>,
    ) -> Result<(), StoreError> {
        match action.kind() {
            ActionKind::Insert => self.append_insert(batch, names, action.item()),
            ActionKind::Update => self.append_update(batch, names, action.item()),
            ActionKind::Delete => self.append_delete(batch, names, action.item()),
        }
    }
}
