//! Counterexample trace reconstruction.
//!
//! Starting from the error location of a satisfiable query, the extractor
//! walks backwards through the instance: a location with one incoming edge
//! has its predecessor directly, one with several reads its predecessor
//! witness from the model. Reaching an instance entry continues in the
//! calling instance from the call site. The collected path is reversed to
//! chronological order and replayed, emitting assignment and function-call
//! events with their model values; values absent from the model are kept
//! as unknown. A missing witness degrades gracefully: the trace is
//! truncated with a marker event.

use argus_automaton::{AutomataSystem, Cfa, LocationId, TransitionKind, FUNCTION_RETURN_VALUE_NAME};
use argus_core::{eval::eval, Context, ExprId, Literal, Valuation, VarId};
use argus_ir::SourceLoc;

use crate::encode::{EncodedInstance, Encoding, ErrorQuery, InstanceId};

/// One event of a counterexample, in chronological order.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// A call producing a value: a nondeterministic input or a lowered
    /// automaton call.
    FunctionCall {
        callee: String,
        return_value: Option<Literal>,
    },
    /// A variable took a value. `source_name` and `location` are present
    /// when the front end supplied debug information.
    Assign {
        name: String,
        source_name: Option<String>,
        value: Option<Literal>,
        location: Option<SourceLoc>,
    },
    /// Reconstruction could not continue; earlier events are still valid.
    Truncated { reason: String },
}

/// An ordered counterexample trace.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn assignments(&self) -> impl Iterator<Item = (&str, Option<Literal>)> {
        self.events.iter().filter_map(|e| match e {
            TraceEvent::Assign { name, value, .. } => Some((name.as_str(), *value)),
            _ => None,
        })
    }

    pub fn calls(&self) -> impl Iterator<Item = (&str, Option<Literal>)> {
        self.events.iter().filter_map(|e| match e {
            TraceEvent::FunctionCall {
                callee,
                return_value,
            } => Some((callee.as_str(), *return_value)),
            _ => None,
        })
    }

    pub fn is_truncated(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TraceEvent::Truncated { .. }))
    }
}

/// Reconstruct the trace of a satisfiable query from its model.
pub fn extract_trace(
    ctx: &Context,
    system: &AutomataSystem,
    encoding: &Encoding,
    query: &ErrorQuery,
    model: &Valuation,
) -> Trace {
    let mut segments: Vec<(InstanceId, Vec<LocationId>)> = Vec::new();
    let mut truncated: Option<String> = None;

    let mut instance_id = query.instance;
    let mut cursor = query.location;

    'outer: loop {
        let instance = encoding.instance(instance_id);
        let cfa = system.cfa(instance.cfa);
        let mut path = Vec::new();

        loop {
            path.push(cursor);
            if cursor == cfa.entry() {
                break;
            }
            let incoming = cfa.location(cursor).incoming();
            cursor = match incoming.len() {
                0 => {
                    truncated = Some(format!(
                        "location {} of '{}' has no predecessors",
                        cursor.0,
                        cfa.name()
                    ));
                    break;
                }
                1 => cfa.transition(incoming[0]).source,
                _ => match read_witness(instance, model, cursor) {
                    Some(pred) => pred,
                    None => {
                        truncated = Some(format!(
                            "missing predecessor witness at location {} of '{}'",
                            cursor.0,
                            cfa.name()
                        ));
                        break;
                    }
                },
            };
        }

        path.reverse();
        segments.push((instance_id, path));

        if truncated.is_some() {
            break;
        }
        match instance.parent {
            Some((parent, call_site, _)) => {
                instance_id = parent;
                cursor = call_site;
            }
            None => break 'outer,
        }
    }

    // Segments were collected innermost-first; chronological order starts
    // at the root.
    segments.reverse();

    let mut trace = Trace::default();
    // A failed walk leaves partial segments; the marker records that the
    // chronological prefix before them is missing.
    if let Some(reason) = truncated {
        trace.events.push(TraceEvent::Truncated { reason });
    }

    for (instance_id, path) in &segments {
        let instance = encoding.instance(*instance_id);
        let cfa = system.cfa(instance.cfa);
        for (step, location) in path.iter().enumerate() {
            emit_location_events(ctx, cfa, instance, model, *location, &mut trace);
            if let Some(next) = path.get(step + 1) {
                emit_transition_events(ctx, system, cfa, instance, model, *location, *next, &mut trace);
            }
        }
    }

    trace
}

fn read_witness(
    instance: &EncodedInstance,
    model: &Valuation,
    location: LocationId,
) -> Option<LocationId> {
    let var = instance.pred_vars.get(&location)?;
    match model.get(*var)? {
        Literal::Int(v) => Some(LocationId(v as u32)),
        Literal::Bv { value, .. } => Some(LocationId(value as u32)),
        _ => None,
    }
}

fn model_value(instance: &EncodedInstance, model: &Valuation, var: VarId) -> Option<Literal> {
    model.get(instance.instance_var(var))
}

/// Nondet input calls and debug bindings recorded at a location.
fn emit_location_events(
    ctx: &Context,
    cfa: &Cfa,
    instance: &EncodedInstance,
    model: &Valuation,
    location: LocationId,
    trace: &mut Trace,
) {
    for call in cfa.nondet_calls() {
        if call.location != location {
            continue;
        }
        trace.events.push(TraceEvent::FunctionCall {
            callee: call.callee.clone(),
            return_value: model_value(instance, model, call.variable),
        });
    }
    for binding in cfa.debug_bindings() {
        if binding.location != location {
            continue;
        }
        let value = eval_under_instance(ctx, instance, model, binding.value);
        trace.events.push(TraceEvent::Assign {
            name: binding.name.clone(),
            source_name: Some(binding.name.clone()),
            value,
            location: binding.source_loc,
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_transition_events(
    ctx: &Context,
    system: &AutomataSystem,
    cfa: &Cfa,
    instance: &EncodedInstance,
    model: &Valuation,
    from: LocationId,
    to: LocationId,
    trace: &mut Trace,
) {
    // Parallel edges between the same pair are disambiguated by evaluating
    // guards under the model; the first satisfied guard wins.
    let candidates: Vec<_> = cfa
        .location(from)
        .outgoing()
        .iter()
        .map(|t| cfa.transition(*t))
        .filter(|t| t.target == to)
        .collect();
    let transition = match candidates.len() {
        0 => return,
        1 => candidates[0],
        _ => candidates
            .iter()
            .find(|t| {
                eval_under_instance(ctx, instance, model, t.guard)
                    .and_then(|l| l.as_bool())
                    .unwrap_or(false)
            })
            .copied()
            .unwrap_or(candidates[0]),
    };

    match &transition.kind {
        TransitionKind::Assign(assigns) => {
            for assign in assigns {
                let variable = ctx.variable(assign.variable);
                trace.events.push(TraceEvent::Assign {
                    name: variable.name().to_string(),
                    source_name: None,
                    value: model_value(instance, model, assign.variable),
                    location: None,
                });
            }
        }
        TransitionKind::Call(call) => {
            let callee = system.cfa(call.callee);
            let return_value = call
                .outputs
                .iter()
                .find(|(callee_out, _)| {
                    ctx.variable(*callee_out)
                        .name()
                        .ends_with(&format!("/{}", FUNCTION_RETURN_VALUE_NAME))
                })
                .and_then(|(_, caller_var)| model_value(instance, model, *caller_var));
            trace.events.push(TraceEvent::FunctionCall {
                callee: callee.name().to_string(),
                return_value,
            });
            // Output bindings surface as assignments so the taken loop
            // exit and loop-carried values are visible in the trace.
            for (_, caller_var) in &call.outputs {
                let variable = ctx.variable(*caller_var);
                trace.events.push(TraceEvent::Assign {
                    name: variable.name().to_string(),
                    source_name: None,
                    value: model_value(instance, model, *caller_var),
                    location: None,
                });
            }
        }
    }
}

fn eval_under_instance(
    ctx: &Context,
    instance: &EncodedInstance,
    model: &Valuation,
    expr: ExprId,
) -> Option<Literal> {
    if instance.var_map.is_empty() {
        return eval(ctx, expr, model);
    }
    let subst: std::collections::HashMap<VarId, ExprId> = instance
        .var_map
        .iter()
        .map(|(from, to)| (*from, ctx.builder().var_ref(*to)))
        .collect();
    let rewritten = ctx.replace_vars(expr, &subst);
    eval(ctx, rewritten, model)
}
