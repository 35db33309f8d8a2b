//! Per-module state of the differentiation transform.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use super::calls::NestedApplyInfo;
use super::diagnostics::{
    error, Reported, Unsupported, EXPRESSION_NOT_DIFFERENTIABLE, FUNCTION_NOT_DIFFERENTIABLE,
    WHEN_DIFFERENTIATING_CALL,
};
use super::invoker::DifferentiationInvoker;
use super::witness::{WitnessKey, WitnessTable};
use crate::autodiff::TangentSpaceResolver;
use crate::diagnostics::{DiagnosticSink, Span};
use crate::ir::{InstId, InstKind, IrFunction, IrModule};
use crate::options::DifferentiationOptions;

/// A pending `differentiable_function` instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub function: String,
    pub inst: InstId,
}

/// Rollback point for transactional witness synthesis.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Checkpoint {
    functions: usize,
    references: usize,
    witnesses: usize,
}

pub struct ADContext<'a> {
    pub(crate) module: &'a mut IrModule,
    pub(crate) witnesses: &'a mut WitnessTable,
    pub(crate) resolver: &'a TangentSpaceResolver<'a>,
    pub(crate) sink: &'a mut DiagnosticSink,
    pub(crate) options: DifferentiationOptions,
    worklist: Vec<WorkItem>,
    processed: HashSet<InstId>,
    invokers: HashMap<WitnessKey, DifferentiationInvoker>,
    /// Calls of the function behind each in-flight request. Dropped when
    /// the request finishes.
    nested_applies: HashMap<WitnessKey, HashMap<InstId, NestedApplyInfo>>,
    generated_functions: Vec<String>,
    /// `(function, inst)` of function references to generated functions.
    generated_references: Vec<(String, InstId)>,
    pub(crate) in_progress: Vec<WitnessKey>,
    pub(crate) failed: HashMap<WitnessKey, Reported>,
}

impl<'a> ADContext<'a> {
    pub fn new(
        module: &'a mut IrModule,
        witnesses: &'a mut WitnessTable,
        resolver: &'a TangentSpaceResolver<'a>,
        sink: &'a mut DiagnosticSink,
        options: DifferentiationOptions,
    ) -> Self {
        Self {
            module,
            witnesses,
            resolver,
            sink,
            options,
            worklist: Vec::new(),
            processed: HashSet::new(),
            invokers: HashMap::new(),
            nested_applies: HashMap::new(),
            generated_functions: Vec::new(),
            generated_references: Vec::new(),
            in_progress: Vec::new(),
            failed: HashMap::new(),
        }
    }

    pub fn add_to_worklist(&mut self, function: impl Into<String>, inst: InstId) {
        self.worklist.push(WorkItem {
            function: function.into(),
            inst,
        });
    }

    /// Most recently added item first.
    pub fn pop_from_worklist(&mut self) -> Option<WorkItem> {
        self.worklist.pop()
    }

    #[must_use]
    pub fn worklist_len(&self) -> usize {
        self.worklist.len()
    }

    #[must_use]
    pub fn is_processed(&self, inst: InstId) -> bool {
        self.processed.contains(&inst)
    }

    pub fn mark_processed(&mut self, inst: InstId) {
        self.processed.insert(inst);
    }

    /// Forget `inst` before a replacement instruction takes its place.
    pub fn forget_processed(&mut self, inst: InstId) {
        self.processed.remove(&inst);
    }

    /// Record why `key` was requested.
    ///
    /// # Panics
    ///
    /// Panics if an invoker is already recorded for `key`.
    pub fn add_invoker(&mut self, key: WitnessKey, invoker: DifferentiationInvoker) {
        assert!(
            !self.invokers.contains_key(&key),
            "invoker already recorded for witness {key}"
        );
        trace!(target: "autodiff.transform", key = %key, invoker = %invoker, "recorded invoker");
        self.invokers.insert(key, invoker);
    }

    #[must_use]
    pub fn invoker(&self, key: &WitnessKey) -> Option<&DifferentiationInvoker> {
        self.invokers.get(key)
    }

    pub(crate) fn record_nested_applies(
        &mut self,
        request: WitnessKey,
        applies: HashMap<InstId, NestedApplyInfo>,
    ) -> &HashMap<InstId, NestedApplyInfo> {
        trace!(target: "autodiff.transform", key = %request, calls = applies.len(), "recorded nested applies");
        let slot = self.nested_applies.entry(request).or_default();
        *slot = applies;
        slot
    }

    #[must_use]
    pub fn nested_apply_info(&self, request: &WitnessKey, apply: InstId) -> Option<&NestedApplyInfo> {
        self.nested_applies.get(request)?.get(&apply)
    }

    /// Requests that currently hold nested apply records.
    #[must_use]
    pub fn nested_apply_requests(&self) -> usize {
        self.nested_applies.len()
    }

    pub(crate) fn clear_nested_applies(&mut self, request: &WitnessKey) {
        self.nested_applies.remove(request);
    }

    /// Add a synthesized function to the module.
    pub fn add_generated_function(&mut self, function: IrFunction) {
        trace!(target: "autodiff.transform", function = %function.name, "generated function");
        self.generated_functions.push(function.name.clone());
        self.module.add_function(function);
    }

    pub fn record_generated_reference(&mut self, function: impl Into<String>, inst: InstId) {
        self.generated_references.push((function.into(), inst));
    }

    #[must_use]
    pub fn generated_functions(&self) -> &[String] {
        &self.generated_functions
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            functions: self.generated_functions.len(),
            references: self.generated_references.len(),
            witnesses: self.witnesses.len(),
        }
    }

    pub(crate) fn generated_since(&self, checkpoint: Checkpoint) -> Vec<String> {
        self.generated_functions
            .get(checkpoint.functions..)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Undo everything generated since `checkpoint`, including nested
    /// witnesses that succeeded on behalf of the failed request.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        for name in self.generated_functions.split_off(checkpoint.functions) {
            self.module.remove_function(&name);
            trace!(target: "autodiff.transform", function = %name, "rolled back generated function");
        }
        for (function, inst) in self.generated_references.split_off(checkpoint.references) {
            if let Some(function) = self.module.function_mut(&function) {
                function.remove_inst(inst);
            }
        }
        for witness in self.witnesses.truncate(checkpoint.witnesses) {
            self.invokers.remove(&witness.key());
        }
    }

    /// Delete generated functions not retained by a registered witness and
    /// drop references to deleted functions. Returns the number of functions
    /// deleted.
    pub fn clean_up(&mut self) -> usize {
        let retained = self.retained_functions();
        let mut deleted = 0;
        let generated = std::mem::take(&mut self.generated_functions);
        for name in generated {
            if retained.contains(&name) {
                self.generated_functions.push(name);
            } else if self.module.remove_function(&name).is_some() {
                deleted += 1;
            }
        }
        let references = std::mem::take(&mut self.generated_references);
        for (function, inst) in references {
            let target = self
                .module
                .function(&function)
                .and_then(|function| function.find_inst(inst))
                .and_then(|inst| match &inst.kind {
                    InstKind::FunctionRef { name } => Some(name.clone()),
                    _ => None,
                });
            match target {
                Some(target) if self.module.function(&target).is_some() => {
                    self.generated_references.push((function, inst));
                }
                _ => {
                    if let Some(function) = self.module.function_mut(&function) {
                        function.remove_inst(inst);
                    }
                }
            }
        }
        debug!(target: "autodiff.transform", deleted, retained = self.generated_functions.len(), "cleaned up generated functions");
        deleted
    }

    /// Witness derivatives plus every function they reference, transitively.
    fn retained_functions(&self) -> HashSet<String> {
        let mut retained = HashSet::new();
        let mut stack: Vec<String> = self
            .witnesses
            .iter()
            .flat_map(|witness| [witness.jvp.clone(), witness.vjp.clone()])
            .collect();
        while let Some(name) = stack.pop() {
            if !retained.insert(name.clone()) {
                continue;
            }
            if let Some(function) = self.module.function(&name) {
                for inst in function.insts() {
                    if let InstKind::FunctionRef { name } = &inst.kind {
                        stack.push(name.clone());
                    }
                }
            }
        }
        retained
    }

    /// Report `unsupported` for the request `key`, rooted at the first
    /// invoker in its chain and annotated with each intermediate call.
    pub(crate) fn diagnose(&mut self, key: &WitnessKey, unsupported: Unsupported) {
        let invoker = self.invokers.get(key).cloned();
        self.report(key, invoker, &Reported::new(unsupported));
    }

    /// Report `failure` of `key` for the request made by `invoker`, which
    /// need not be the invoker recorded for `key`.
    pub(crate) fn report(
        &mut self,
        key: &WitnessKey,
        invoker: Option<DifferentiationInvoker>,
        failure: &Reported,
    ) {
        let mut call_sites = failure.call_sites.clone();
        let mut root = None;
        let mut current = invoker;
        // The chain is acyclic; the bound only guards against corrupt state.
        for _ in 0..=self.invokers.len() {
            let Some(invoker) = current else { break };
            match invoker.parent() {
                Some(parent) => {
                    call_sites.push(invoker.span());
                    current = self.invokers.get(parent).cloned();
                }
                None => {
                    root = Some(invoker);
                    break;
                }
            }
        }
        let (message, span) = match root {
            Some(invoker) => (invoker.root_message(), invoker.span()),
            None => (
                FUNCTION_NOT_DIFFERENTIABLE,
                self.module.function(&key.original).and_then(|function| function.span),
            ),
        };
        let cause = &failure.cause;
        let mut diagnostic = error(cause.code, message, span);
        diagnostic.add_note_at(cause.span, cause.message.clone());
        for site in call_sites {
            diagnostic.add_note_at(site, WHEN_DIFFERENTIATING_CALL);
        }
        debug!(
            target: "autodiff.transform",
            key = %key,
            code = cause.code,
            reason = %cause.message,
            "differentiation failed"
        );
        self.sink.push(diagnostic);
    }

    /// Report a failure that has no witness, such as a transposeless linear
    /// function.
    pub(crate) fn diagnose_expression(&mut self, unsupported: Unsupported, span: Option<Span>) {
        let mut diagnostic = error(
            unsupported.code,
            EXPRESSION_NOT_DIFFERENTIABLE,
            span,
        );
        diagnostic.add_note_at(unsupported.span, unsupported.message);
        self.sink.push(diagnostic);
    }
}
