//! Module-level driver: canonicalizes `differentiable_function`
//! instructions and synthesizes the witnesses they need.

use tracing::{debug, info, info_span, trace, warn};

use super::activity::Activity;
use super::context::{ADContext, WorkItem};
use super::diagnostics::{codes, warning, Failure, Reported, Unsupported};
use super::invoker::DifferentiationInvoker;
use super::jvp::{emit_jvp, emit_jvp_stub};
use super::legality::check_function;
use super::vjp::emit_vjp;
use super::witness::{single_result_config, DifferentiabilityWitness, WitnessKey, WitnessTable};
use crate::autodiff::TangentSpaceResolver;
use crate::diagnostics::{DiagnosticSink, Suggestion};
use crate::ir::{cfg, Extractee, InstKind, IrModule, ValueId};
use crate::options::DifferentiationOptions;
use crate::types::{ConformanceLookup, Type};

/// Counts reported by [`differentiate_module`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DifferentiationSummary {
    /// Witnesses registered during this run.
    pub witnesses: usize,
    /// `differentiable_function` instructions given derivatives.
    pub canonicalized: usize,
    /// Extract instructions folded away.
    pub folded: usize,
    /// Generated functions deleted by cleanup.
    pub deleted: usize,
    pub errors: usize,
}

/// Run the differentiation transform over `module`.
///
/// Witnesses already in `witnesses` are reused; new ones are added. Every
/// rejected request is reported through `sink`, including later requests
/// that reach a witness which already failed. Failures leave no generated
/// code behind.
pub fn differentiate_module(
    module: &mut IrModule,
    witnesses: &mut WitnessTable,
    env: &dyn ConformanceLookup,
    options: DifferentiationOptions,
    sink: &mut DiagnosticSink,
) -> DifferentiationSummary {
    let span = info_span!(target: "autodiff.transform", "differentiate_module", module = %module.name);
    let _guard = span.enter();
    let resolver = TangentSpaceResolver::new(env);
    let errors_before = sink.error_count();
    let witnesses_before = witnesses.len();

    let mut ctx = ADContext::new(module, witnesses, &resolver, sink, options);
    ctx.register_custom_witnesses();
    ctx.synthesize_attribute_witnesses();
    let names = ctx.module.function_names();
    ctx.collect_work(&names, true);

    let mut summary = DifferentiationSummary::default();
    while let Some(item) = ctx.pop_from_worklist() {
        if let Some(folded) = ctx.process(&item) {
            summary.canonicalized += 1;
            summary.folded += folded;
        }
    }
    summary.deleted = ctx.clean_up();
    summary.witnesses = ctx.witnesses.len().saturating_sub(witnesses_before);
    summary.errors = ctx.sink.error_count().saturating_sub(errors_before);
    info!(
        target: "autodiff.transform",
        witnesses = summary.witnesses,
        canonicalized = summary.canonicalized,
        folded = summary.folded,
        deleted = summary.deleted,
        errors = summary.errors,
        "differentiation finished"
    );
    summary
}

impl ADContext<'_> {
    /// Attributes naming both derivatives become witnesses directly.
    fn register_custom_witnesses(&mut self) {
        let mut custom = Vec::new();
        for function in self.module.functions() {
            for attr in &function.differentiable {
                if let (Some(jvp), Some(vjp)) = (&attr.jvp, &attr.vjp) {
                    let witness = DifferentiabilityWitness {
                        original: function.name.clone(),
                        config: attr.config.clone(),
                        jvp: jvp.clone(),
                        vjp: vjp.clone(),
                    };
                    custom.push((witness, attr.span));
                }
            }
        }
        for (witness, span) in custom {
            if self.witnesses.get(&witness.key()).is_some_and(|existing| *existing == witness) {
                continue;
            }
            trace!(target: "autodiff.witness", key = %witness.key(), "registering custom witness");
            if let Err(error) = self.witnesses.register(witness) {
                self.sink.push(error.into_diagnostic(span));
            }
        }
    }

    /// Synthesize a witness for every attribute of a defined function that
    /// does not yet have one.
    fn synthesize_attribute_witnesses(&mut self) {
        let mut requests = Vec::new();
        for function in self.module.functions() {
            if function.is_declaration() {
                continue;
            }
            for attr in &function.differentiable {
                let key = WitnessKey::new(function.name.clone(), attr.config.clone());
                requests.push((key, attr.span));
            }
        }
        for (key, span) in requests {
            if self.witnesses.contains(&key) || self.failed.contains_key(&key) {
                continue;
            }
            let invoker = DifferentiationInvoker::Witness {
                key: key.clone(),
                span,
            };
            // Failures are diagnosed inside; nothing else to do here.
            let _ = self.ensure_witness(key, invoker);
        }
    }

    /// Queue unprocessed `differentiable_function` instructions of
    /// `functions`. The initial scan also rejects transposeless linear
    /// functions.
    fn collect_work(&mut self, functions: &[String], initial: bool) {
        let mut pending = Vec::new();
        let mut transposeless = Vec::new();
        for name in functions {
            let Some(function) = self.module.function(name) else { continue };
            for inst in function.insts() {
                match &inst.kind {
                    InstKind::DifferentiableFunction { derivatives: None, .. } => {
                        pending.push((name.clone(), inst.id));
                    }
                    InstKind::LinearFunction { transpose: None, .. } if initial => {
                        transposeless.push(inst.span);
                    }
                    _ => {}
                }
            }
        }
        for (function, inst) in pending {
            if !self.is_processed(inst) {
                self.add_to_worklist(function, inst);
            }
        }
        for span in transposeless {
            self.diagnose_expression(
                Unsupported::new(
                    codes::LINEAR_WITHOUT_TRANSPOSE,
                    "cannot transpose a linear function without a transpose",
                    span,
                ),
                span,
            );
        }
    }

    /// Give one `differentiable_function` instruction its derivatives.
    /// Returns the number of extracts folded, or `None` when the
    /// instruction was skipped or could not be differentiated.
    fn process(&mut self, item: &WorkItem) -> Option<usize> {
        if self.is_processed(item.inst) {
            return None;
        }
        self.mark_processed(item.inst);
        let function = self.module.function(&item.function)?;
        let inst = function.find_inst(item.inst)?;
        let InstKind::DifferentiableFunction {
            original,
            parameter_indices,
            derivatives: None,
        } = &inst.kind
        else {
            return None;
        };
        let (original, parameter_indices, span, result) =
            (*original, parameter_indices.clone(), inst.span, inst.result);
        let bundle_ty = result.and_then(|result| function.value_type(result).cloned());
        let callee = match function.defining_inst(original).map(|def| &def.kind) {
            Some(InstKind::FunctionRef { name }) => name.clone(),
            _ => {
                self.diagnose_expression(
                    Unsupported::new(
                        codes::OPAQUE_FUNCTION_VALUE,
                        "opaque non-'@differentiable' function is not differentiable",
                        span,
                    ),
                    span,
                );
                return None;
            }
        };

        let config = match self.module.function(&callee) {
            Some(target) => target
                .differentiable
                .iter()
                .find(|attr| attr.config.parameter_indices == parameter_indices)
                .map(|attr| attr.config.clone())
                .unwrap_or_else(|| {
                    single_result_config(parameter_indices.clone(), target.ty.generic_signature.clone())
                }),
            None => single_result_config(parameter_indices.clone(), None),
        };
        let key = WitnessKey::new(callee, config);
        let invoker = DifferentiationInvoker::DifferentiableFunctionInst {
            function: item.function.clone(),
            inst: item.inst,
            span,
        };
        let witness = self.ensure_witness(key, invoker).ok()?;
        let jvp_ty = self.module.function(&witness.jvp).map(|f| Type::Function(f.ty.clone()));
        let vjp_ty = self.module.function(&witness.vjp).map(|f| Type::Function(f.ty.clone()));

        let function = self.module.function_mut(&item.function)?;
        let (block, index) = function.position_of(item.inst)?;
        let (jvp_ref, jvp) = function.insert_inst(
            block,
            index,
            InstKind::FunctionRef {
                name: witness.jvp.clone(),
            },
            Some(jvp_ty.unwrap_or_else(Type::unit)),
            span,
        );
        let (vjp_ref, vjp) = function.insert_inst(
            block,
            index + 1,
            InstKind::FunctionRef {
                name: witness.vjp.clone(),
            },
            Some(vjp_ty.unwrap_or_else(Type::unit)),
            span,
        );
        let (Some(jvp), Some(vjp)) = (jvp, vjp) else {
            return None;
        };
        function.remove_inst(item.inst);
        let (replacement, bundle) = function.insert_inst(
            block,
            index + 2,
            InstKind::DifferentiableFunction {
                original,
                parameter_indices,
                derivatives: Some((jvp, vjp)),
            },
            bundle_ty,
            span,
        );
        if let (Some(old), Some(new)) = (result, bundle) {
            function.replace_all_uses(old, new);
        }
        self.record_generated_reference(item.function.clone(), jvp_ref);
        self.record_generated_reference(item.function.clone(), vjp_ref);
        self.forget_processed(item.inst);
        self.mark_processed(replacement);

        let folded = match bundle {
            Some(bundle) if !self.options.skip_folding_extractions => {
                self.fold_extracts(&item.function, bundle, [original, jvp, vjp])
            }
            _ => 0,
        };
        debug!(
            target: "autodiff.transform",
            function = %item.function,
            jvp = %witness.jvp,
            vjp = %witness.vjp,
            folded,
            "canonicalized differentiable_function"
        );
        Some(folded)
    }

    /// Replace extracts of `bundle` with the component values directly.
    fn fold_extracts(&mut self, function: &str, bundle: ValueId, components: [ValueId; 3]) -> usize {
        let Some(function) = self.module.function_mut(function) else {
            return 0;
        };
        let [original, jvp, vjp] = components;
        let mut folds = Vec::new();
        for user in function.users(bundle) {
            let Some(inst) = function.find_inst(user) else { continue };
            if let (InstKind::DifferentiableFunctionExtract { extractee, .. }, Some(result)) =
                (&inst.kind, inst.result)
            {
                let component = match extractee {
                    Extractee::Original => original,
                    Extractee::Jvp => jvp,
                    Extractee::Vjp => vjp,
                };
                folds.push((user, result, component));
            }
        }
        for (user, result, component) in &folds {
            function.replace_all_uses(*result, *component);
            function.remove_inst(*user);
        }
        folds.len()
    }

    /// Look up or synthesize the witness for `key`. A failure is diagnosed
    /// once per requester, rooted at the outermost request of the chain.
    pub(crate) fn ensure_witness(
        &mut self,
        key: WitnessKey,
        invoker: DifferentiationInvoker,
    ) -> Result<DifferentiabilityWitness, Reported> {
        if let Some(existing) = self.witnesses.get(&key) {
            return Ok(existing.clone());
        }
        if let Some(failure) = self.failed.get(&key).cloned() {
            debug!(target: "autodiff.transform", key = %key, invoker = %invoker, "request reached a failed witness");
            self.report(&key, Some(invoker), &failure);
            return Err(failure);
        }
        if self.in_progress.contains(&key) {
            let unsupported = Unsupported::new(
                codes::RECURSIVE_DIFFERENTIATION,
                format!("cannot differentiate recursive call to '{}'", key.original),
                invoker.span(),
            );
            warn!(target: "autodiff.transform", key = %key, "recursive differentiation request");
            let requester = invoker.parent().cloned().unwrap_or(key);
            self.diagnose(&requester, unsupported.clone());
            return Err(Reported::new(unsupported));
        }

        self.add_invoker(key.clone(), invoker);
        if self.in_progress.len() >= self.options.max_nesting_depth {
            let unsupported = Unsupported::new(
                codes::NESTING_TOO_DEEP,
                format!(
                    "derivative requests nest deeper than {} levels",
                    self.options.max_nesting_depth
                ),
                None,
            );
            return Err(self.fail(key, unsupported));
        }

        self.in_progress.push(key.clone());
        let checkpoint = self.checkpoint();
        let outcome = self.synthesize(&key);
        self.in_progress.pop();
        self.clear_nested_applies(&key);

        match outcome {
            Ok(witness) => {
                if let Err(error) = self.witnesses.register(witness.clone()) {
                    let span = self.invoker(&key).and_then(DifferentiationInvoker::span);
                    let cause = Unsupported::new(codes::DUPLICATE_WITNESS, error.to_string(), span);
                    self.sink.push(error.into_diagnostic(span));
                    self.rollback(checkpoint);
                    let failure = Reported::new(cause);
                    self.failed.insert(key, failure.clone());
                    return Err(failure);
                }
                debug!(target: "autodiff.transform", key = %key, jvp = %witness.jvp, vjp = %witness.vjp, "registered witness");
                let generated = self.generated_since(checkpoint);
                self.collect_work(&generated, false);
                Ok(witness)
            }
            Err(failure) => {
                self.rollback(checkpoint);
                match failure {
                    Failure::Unsupported(unsupported) => Err(self.fail(key, unsupported)),
                    Failure::Reported(reported) => {
                        self.failed.insert(key, reported.clone());
                        Err(reported)
                    }
                }
            }
        }
    }

    /// Diagnose `unsupported` for `key` and remember it for later requests.
    fn fail(&mut self, key: WitnessKey, unsupported: Unsupported) -> Reported {
        self.diagnose(&key, unsupported.clone());
        let failure = Reported::new(unsupported);
        self.failed.insert(key, failure.clone());
        failure
    }

    fn synthesize(&mut self, key: &WitnessKey) -> Result<DifferentiabilityWitness, Failure> {
        let original = self.module.function(&key.original).cloned().ok_or_else(|| {
            Unsupported::new(
                codes::UNKNOWN_FUNCTION,
                format!("function '{}' is not defined in this module", key.original),
                None,
            )
        })?;
        let custom = original
            .differentiable
            .iter()
            .find(|attr| attr.config == key.config)
            .cloned();
        let custom_jvp = custom.as_ref().and_then(|attr| attr.jvp.clone());
        let custom_vjp = custom.as_ref().and_then(|attr| attr.vjp.clone());
        if let (Some(jvp), Some(vjp)) = (&custom_jvp, &custom_vjp) {
            return Ok(DifferentiabilityWitness {
                original: key.original.clone(),
                config: key.config.clone(),
                jvp: jvp.clone(),
                vjp: vjp.clone(),
            });
        }
        if original.is_declaration() {
            return Err(Unsupported::new(
                codes::EXTERNAL_FUNCTION,
                "cannot differentiate functions that have not been marked '@differentiable' and that are defined in other modules",
                original.span,
            )
            .into());
        }
        if original.is_opaque() {
            return Err(Unsupported::new(
                codes::OPAQUE_SEMANTICS,
                "cannot differentiate a function with opaque semantics",
                original.span,
            )
            .into());
        }

        let signature = key
            .config
            .derivative_generic_signature
            .as_ref()
            .or(original.ty.generic_signature.as_ref());
        let activity = Activity::analyze(&original, &key.config.parameter_indices, self.resolver, signature);
        if self.options.warn_nonvaried_result && !activity.result_is_varied(&original) {
            let diagnostic = warning(
                codes::NONVARIED_RESULT,
                "result does not depend on differentiation arguments and will always have a zero derivative",
                original.span,
            )
            .with_suggestion(Suggestion::new(
                "use 'withoutDerivative(at:)' to silence this warning",
                original.span,
                None,
            ));
            self.sink.push(diagnostic);
        }
        check_function(&original, &activity)?;
        let order = cfg::straight_line_order(&original).ok_or_else(|| {
            Unsupported::new(
                codes::CONTROL_FLOW_UNSUPPORTED,
                "differentiating control flow is not yet supported",
                original.span,
            )
        })?;

        let vjp = match custom_vjp {
            Some(vjp) => vjp,
            None => emit_vjp(self, &original, key, &activity, &order)?,
        };
        let jvp = match custom_jvp {
            Some(jvp) => jvp,
            None if self.options.enable_forward_mode => emit_jvp(self, &original, key, &activity, &order)?,
            None => emit_jvp_stub(self, &original, key)?,
        };
        Ok(DifferentiabilityWitness {
            original: key.original.clone(),
            config: key.config.clone(),
            jvp,
            vjp,
        })
    }
}
