//! Existence predicates over many-to-many collections.
//!
//! A predicate is evaluated as a semi-join: the related table is filtered
//! once, the join table maps the surviving related keys to owner keys, and
//! the owner rows are then tested for membership in that key set. Owner rows
//! are never multiplied by the join, so `count` and `find` agree.

use super::compile::{compile_filter, CompiledFilter};
use super::filter::{CollectionOperator, Filter};
use super::render::SqlRenderer;
use crate::core::{DbError, Result, Value};
use crate::metadata::{EntityMapping, JoinPath, MetadataRegistry};
use crate::storage::ReadView;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Owner keys produced by one predicate evaluation.
pub(crate) struct OwnerKeys {
    keys: HashSet<Value>,
    negated: bool,
}

impl OwnerKeys {
    pub fn admits(&self, key: &Value) -> bool {
        self.keys.contains(key) != self.negated
    }
}

#[derive(Debug, Clone)]
pub struct RelationExistencePredicate {
    entity: String,
    relation: String,
    path: JoinPath,
    operator: CollectionOperator,
    target: Arc<EntityMapping>,
    filter: CompiledFilter,
}

impl RelationExistencePredicate {
    /// Resolve `entity.relation` and compile `filter` against the related
    /// entity. Unknown relations and fields, and literals that do not fit
    /// their column, are rejected here.
    pub fn compile(
        registry: &MetadataRegistry,
        entity: &str,
        relation: &str,
        operator: CollectionOperator,
        filter: &Filter,
    ) -> Result<Self> {
        let path = registry.join_path(entity, relation)?.clone();
        let target = registry.entity(path.related_entity())?;
        let filter = CompiledFilter::from_parts(Arc::clone(&target), compile_filter(registry, &target, filter)?);
        Ok(Self {
            entity: entity.to_string(),
            relation: relation.to_string(),
            path,
            operator,
            target,
            filter,
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn operator(&self) -> CollectionOperator {
        self.operator
    }

    pub(crate) fn collect_tables(&self, tables: &mut BTreeSet<String>) {
        tables.insert(self.path.join.table.clone());
        self.filter.collect_tables(tables);
    }

    /// Evaluate against a read view.
    ///
    /// `$some` keeps owners with at least one matching related row, `$none`
    /// drops them, and `$every` drops owners with at least one related row
    /// that does not match.
    pub(crate) fn owner_keys(&self, view: &ReadView) -> Result<OwnerKeys> {
        let matching = self.filter.select_keys(view)?;

        let witnesses: HashSet<Value> = match self.operator {
            CollectionOperator::Some | CollectionOperator::None => matching.into_iter().collect(),
            CollectionOperator::Every => view
                .table(self.target.table_name())?
                .rows()
                .map(|row| self.target.key_of_row(row))
                .filter(|key| !matching.contains(key))
                .collect(),
        };

        let join = view.table(&self.path.join.table)?;
        let columns = join.schema().schema();
        let source = columns
            .find_column_index(self.path.source_column())
            .ok_or_else(|| DbError::ColumnNotFound(self.path.source_column().to_string(), join.name().to_string()))?;
        let related = columns
            .find_column_index(self.path.related_column())
            .ok_or_else(|| DbError::ColumnNotFound(self.path.related_column().to_string(), join.name().to_string()))?;

        let keys = join
            .rows()
            .filter(|row| witnesses.contains(&row[related]))
            .map(|row| row[source].clone())
            .collect();

        Ok(OwnerKeys {
            keys,
            negated: self.operator != CollectionOperator::Some,
        })
    }

    pub(crate) fn render(&self, renderer: &mut SqlRenderer, owner: &EntityMapping, alias: &str) -> String {
        let join_alias = renderer.next_alias("j");
        let target_alias = renderer.next_alias("e");
        let mut condition = renderer.node(&self.target, &target_alias, self.filter.root());
        if self.operator == CollectionOperator::Every {
            condition = format!("not ({})", condition);
        }

        let subquery = format!(
            "select {j}.\"{src}\" from \"{jt}\" as {j} inner join \"{tt}\" as {t} on {t}.\"{tpk}\" = {j}.\"{rel}\" where {cond}",
            j = join_alias,
            src = self.path.source_column(),
            jt = self.path.join.table,
            tt = self.target.table_name(),
            t = target_alias,
            tpk = self.target.schema().schema().columns()[0].name,
            rel = self.path.related_column(),
            cond = condition,
        );
        let keyword = match self.operator {
            CollectionOperator::Some => "in",
            CollectionOperator::None | CollectionOperator::Every => "not in",
        };
        format!("{} {} ({})", SqlRenderer::column(owner, alias, 0), keyword, subquery)
    }
}
