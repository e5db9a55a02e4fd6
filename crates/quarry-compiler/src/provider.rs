//! Query provider: one entry point over the whole compile pipeline
//!
//! normalize → secure → bind → optimize → translate. The provider holds only
//! configuration, so compilations never share state and may run on any
//! number of threads at once.

use crate::binder::Binder;
use crate::error::{CompileError, CompileResult, QueryError};
use crate::exec::DataSource;
use crate::ir::{CommandNode, Plan, ScopeArena};
use crate::normalize::{normalize, normalize_lambda, MacroRegistry};
use crate::optimize::{Optimizer, PassContext};
use crate::query::{Lambda, QueryNode};
use crate::security::SecurityFilters;
use crate::translate::{CommandTranslation, Translation, TranslatorBuilder};
use log::debug;
use quarry_core::{Catalog, Config};
use serde::de::DeserializeOwned;

/// Compiles operator trees against one catalog and configuration
#[derive(Debug, Clone)]
pub struct QueryProvider {
    catalog: Catalog,
    config: Config,
    macros: MacroRegistry,
    security: SecurityFilters,
}

impl QueryProvider {
    pub fn new(catalog: Catalog, config: Config) -> Self {
        Self {
            catalog,
            config,
            macros: MacroRegistry::new(),
            security: SecurityFilters::new(),
        }
    }

    /// Expand these custom operators before binding
    pub fn with_macros(mut self, macros: MacroRegistry) -> Self {
        self.macros = macros;
        self
    }

    /// Restrict every entity source by these row predicates
    pub fn with_security(mut self, security: SecurityFilters) -> Self {
        self.security = security;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compile a query tree
    pub fn compile(&self, tree: &QueryNode) -> CompileResult<Translation> {
        let tree = self.prepare(tree);
        let mut binder = Binder::new(&self.catalog, &self.security);
        let projection = binder.bind(&tree)?;
        match self.optimize(Plan::Query(projection), binder.into_arena())? {
            Plan::Query(projection) => self.translator().build(projection),
            Plan::Command(_) => Err(unexpected_plan("query")),
        }
    }

    /// Command text of a query, for inspection
    pub fn query_text(&self, tree: &QueryNode) -> CompileResult<String> {
        Ok(self.compile(tree)?.command.text)
    }

    /// Compile and run a query
    pub fn execute(
        &self,
        tree: &QueryNode,
        source: &dyn DataSource,
    ) -> Result<Vec<serde_json::Value>, QueryError> {
        self.compile(tree)?.execute(source)
    }

    /// Compile and run a query, deserializing each result into `T`
    pub fn execute_as<T: DeserializeOwned>(
        &self,
        tree: &QueryNode,
        source: &dyn DataSource,
    ) -> Result<Vec<T>, QueryError> {
        self.compile(tree)?.execute_as(source)
    }

    /// Compile a `DELETE` of the entity rows `tree` yields
    pub fn compile_delete(&self, tree: &QueryNode) -> CompileResult<CommandTranslation> {
        let tree = self.prepare(tree);
        self.compile_command(|binder| binder.bind_delete(&tree))
    }

    /// Compile an `UPDATE` of the entity rows `tree` yields
    pub fn compile_update(
        &self,
        tree: &QueryNode,
        assignments: &Lambda,
    ) -> CompileResult<CommandTranslation> {
        let tree = self.prepare(tree);
        let assignments = self.prepare_lambda(assignments);
        self.compile_command(|binder| binder.bind_update(&tree, &assignments))
    }

    /// Compile an `INSERT` into `entity` of the objects `selector` builds
    pub fn compile_insert(
        &self,
        entity: &str,
        source: Option<&QueryNode>,
        selector: &Lambda,
    ) -> CompileResult<CommandTranslation> {
        let source = source.map(|tree| self.prepare(tree));
        let selector = self.prepare_lambda(selector);
        self.compile_command(|binder| binder.bind_insert(entity, source.as_ref(), &selector))
    }

    /// Compile and run a `DELETE`, returning the affected row count
    pub fn delete(&self, tree: &QueryNode, source: &dyn DataSource) -> Result<u64, QueryError> {
        self.compile_delete(tree)?.execute(source)
    }

    /// Compile and run an `UPDATE`, returning the affected row count
    pub fn update(
        &self,
        tree: &QueryNode,
        assignments: &Lambda,
        source: &dyn DataSource,
    ) -> Result<u64, QueryError> {
        self.compile_update(tree, assignments)?.execute(source)
    }

    /// Compile and run an `INSERT`, returning the affected row count
    pub fn insert(
        &self,
        entity: &str,
        rows: Option<&QueryNode>,
        selector: &Lambda,
        source: &dyn DataSource,
    ) -> Result<u64, QueryError> {
        self.compile_insert(entity, rows, selector)?.execute(source)
    }

    fn prepare(&self, tree: &QueryNode) -> QueryNode {
        debug!("Normalizing {} query", tree.kind_name());
        let normalized = normalize(tree.clone(), &self.macros, &self.config.normalizer);
        self.security.apply(normalized)
    }

    fn prepare_lambda(&self, lambda: &Lambda) -> Lambda {
        let normalized = normalize_lambda(lambda.clone(), &self.macros, &self.config.normalizer);
        self.security.apply_lambda(normalized)
    }

    fn optimize(&self, plan: Plan, arena: ScopeArena) -> CompileResult<Plan> {
        let mut cx = PassContext::new(arena, self.config.optimizer.clone());
        Optimizer::with_defaults().run(plan, &mut cx)
    }

    fn compile_command(
        &self,
        bind: impl FnOnce(&mut Binder<'_>) -> CompileResult<CommandNode>,
    ) -> CompileResult<CommandTranslation> {
        let mut binder = Binder::new(&self.catalog, &self.security);
        let command = bind(&mut binder)?;
        match self.optimize(Plan::Command(command), binder.into_arena())? {
            Plan::Command(command) => self.translator().build_command(command),
            Plan::Query(_) => Err(unexpected_plan("command")),
        }
    }

    fn translator(&self) -> TranslatorBuilder {
        TranslatorBuilder::new(self.config.dialect)
    }
}

fn unexpected_plan(expected: &str) -> CompileError {
    CompileError::Translation {
        message: format!("optimizer changed the kind of a {expected} plan"),
    }
}

#[cfg(test)]
#[path = "provider_test.rs"]
mod tests;
