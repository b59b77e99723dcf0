//! Reachability encoding.
//!
//! For one automaton instance, locations are visited in topological order
//! and a forward dynamic program accumulates the reachability precondition
//! of every location: the entry is reachable under the instance's prefix,
//! and each other location is reachable by the disjunction over its
//! incoming transitions of "source reachable and edge taken". Call
//! transitions are inlined recursively with fresh per-instance variables,
//! cut off once a callee has been unfolded `unwind_bound` times along the
//! chain; paths beyond the bound are dropped, making every verdict an
//! under-approximation bounded by the unwind.
//!
//! Locations with more than one incoming transition receive an auxiliary
//! predecessor witness variable, constrained on each edge to the source
//! location's id, so trace reconstruction is a linear walk.

use std::collections::HashMap;

use tracing::debug;

use argus_automaton::{
    AutomataSystem, Cfa, CfaId, IntRepresentation, LocationId, Transition, TransitionId,
    TransitionKind,
};
use argus_core::{Context, ExprId, ExprKind, VarId};

use crate::{BmcError, BmcResult};

/// Settings of one checking run.
#[derive(Debug, Clone, Copy)]
pub struct BmcSettings {
    /// How program integers were lowered; witness variables follow suit.
    pub int_representation: IntRepresentation,
    /// Maximum number of inlined instances of one automaton per call chain.
    pub unwind_bound: u32,
}

impl Default for BmcSettings {
    fn default() -> Self {
        BmcSettings {
            int_representation: IntRepresentation::default(),
            unwind_bound: 64,
        }
    }
}

/// Index of an inlined automaton instance within an [`Encoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u32);

/// One unfolding of an automaton.
#[derive(Debug)]
pub struct EncodedInstance {
    pub cfa: CfaId,
    /// Automaton variable to per-instance variable; empty for the root,
    /// whose variables are used as they are.
    pub var_map: HashMap<VarId, VarId>,
    /// Predecessor witnesses for locations with several incoming edges.
    pub pred_vars: HashMap<LocationId, VarId>,
    /// Caller instance, the location the call left from, and the call
    /// transition; `None` for the root.
    pub parent: Option<(InstanceId, LocationId, TransitionId)>,
}

impl EncodedInstance {
    /// The per-instance variable standing for an automaton variable.
    pub fn instance_var(&self, var: VarId) -> VarId {
        self.var_map.get(&var).copied().unwrap_or(var)
    }
}

/// One satisfiability query: an error location with its reachability
/// precondition.
#[derive(Debug)]
pub struct ErrorQuery {
    pub instance: InstanceId,
    pub location: LocationId,
    pub formula: ExprId,
    /// Error payload, already rewritten to instance variables.
    pub error_code: Option<ExprId>,
}

/// Result of encoding the main automaton.
#[derive(Debug)]
pub struct Encoding {
    pub instances: Vec<EncodedInstance>,
    pub queries: Vec<ErrorQuery>,
}

impl Encoding {
    pub fn instance(&self, id: InstanceId) -> &EncodedInstance {
        &self.instances[id.0 as usize]
    }
}

/// Encode reachability of every error location of the system's main
/// automaton, inlining calls up to the unwind bound.
pub fn encode_reachability(
    ctx: &Context,
    system: &AutomataSystem,
    settings: &BmcSettings,
) -> BmcResult<Encoding> {
    let main = system.main().ok_or(BmcError::NoMainAutomaton)?;
    let mut encoder = Encoder {
        ctx,
        system,
        settings: *settings,
        instances: Vec::new(),
        queries: Vec::new(),
        assign_cache: HashMap::new(),
        fresh: 0,
    };
    let prefix = ctx.builder().true_lit();
    encoder.encode_instance(main, prefix, HashMap::new(), None, &HashMap::new())?;
    debug!(
        instances = encoder.instances.len(),
        queries = encoder.queries.len(),
        "reachability encoding complete"
    );
    Ok(Encoding {
        instances: encoder.instances,
        queries: encoder.queries,
    })
}

struct Encoder<'ctx, 's> {
    ctx: &'ctx Context,
    system: &'s AutomataSystem,
    settings: BmcSettings,
    instances: Vec<EncodedInstance>,
    queries: Vec<ErrorQuery>,
    /// Per-transition formulas over the automaton's own variables, computed
    /// once per automaton regardless of how often it is inlined.
    assign_cache: HashMap<(u32, u32), ExprId>,
    fresh: u32,
}

impl<'ctx, 's> Encoder<'ctx, 's> {
    /// Encode one instance of `cfa_id`. `prefix` is the absolute condition
    /// under which this instance is entered, inputs already bound. Returns
    /// the absolute condition of reaching the instance's exit, or `None`
    /// when every path was cut by the unwind bound.
    fn encode_instance(
        &mut self,
        cfa_id: CfaId,
        prefix: ExprId,
        var_map: HashMap<VarId, VarId>,
        parent: Option<(InstanceId, LocationId, TransitionId)>,
        depths: &HashMap<u32, u32>,
    ) -> BmcResult<Option<ExprId>> {
        let cfa = self.system.cfa(cfa_id);
        let builder = self.ctx.builder();
        let instance_id = InstanceId(self.instances.len() as u32);
        self.instances.push(EncodedInstance {
            cfa: cfa_id,
            var_map,
            pred_vars: HashMap::new(),
            parent,
        });

        // Expression-level substitution derived from the variable renaming.
        let subst: HashMap<VarId, ExprId> = self.instances[instance_id.0 as usize]
            .var_map
            .iter()
            .map(|(from, to)| (*from, builder.var_ref(*to)))
            .collect();

        let order = location_topo_order(cfa);
        let mut reach: HashMap<LocationId, ExprId> = HashMap::new();
        let false_lit = builder.false_lit();
        reach.insert(cfa.entry(), prefix);

        for loc in order {
            if loc == cfa.entry() {
                continue;
            }
            let location = cfa.location(loc);
            let incoming = location.incoming().to_vec();

            let pred_var = if incoming.len() > 1 {
                let var = self.fresh_pred_var(loc)?;
                self.instances[instance_id.0 as usize]
                    .pred_vars
                    .insert(loc, var);
                Some(var)
            } else {
                None
            };

            let mut disjuncts = Vec::new();
            for t_id in incoming {
                let transition = cfa.transition(t_id);
                let source_reach = reach
                    .get(&transition.source)
                    .copied()
                    .unwrap_or(false_lit);
                if source_reach == false_lit {
                    continue;
                }

                let edge = match &transition.kind {
                    TransitionKind::Assign(_) => {
                        let template = self.assign_template(cfa_id, t_id, transition)?;
                        let edge = self.substitute(template, &subst);
                        builder
                            .and(source_reach, edge)
                            .map_err(BmcError::Context)?
                    }
                    TransitionKind::Call(_) => {
                        match self.encode_call(
                            instance_id,
                            t_id,
                            transition,
                            source_reach,
                            &subst,
                            depths,
                        )? {
                            Some(f) => f,
                            None => continue,
                        }
                    }
                };

                let edge = match pred_var {
                    Some(var) => {
                        let witness = builder
                            .eq(
                                builder.var_ref(var),
                                self.location_constant(transition.source),
                            )
                            .map_err(BmcError::Context)?;
                        builder.and(edge, witness).map_err(BmcError::Context)?
                    }
                    None => edge,
                };
                disjuncts.push(edge);
            }

            let formula = builder.or_many(&disjuncts).map_err(BmcError::Context)?;
            reach.insert(loc, formula);

            if location.is_error() && formula != false_lit {
                let error_code = cfa
                    .error_code(loc)
                    .map(|code| self.substitute(code, &subst));
                self.queries.push(ErrorQuery {
                    instance: instance_id,
                    location: loc,
                    formula,
                    error_code,
                });
            }
        }

        let exit_reach = reach.get(&cfa.exit()).copied().unwrap_or(false_lit);
        Ok((exit_reach != false_lit).then_some(exit_reach))
    }

    /// Inline one call transition: bind inputs to a fresh copy of the
    /// callee's variables, encode the callee's exit reachability under that
    /// prefix, and bind outputs back into the caller.
    fn encode_call(
        &mut self,
        caller: InstanceId,
        t_id: TransitionId,
        transition: &Transition,
        source_reach: ExprId,
        caller_subst: &HashMap<VarId, ExprId>,
        depths: &HashMap<u32, u32>,
    ) -> BmcResult<Option<ExprId>> {
        let TransitionKind::Call(call) = &transition.kind else {
            unreachable!("encode_call requires a call transition");
        };
        let builder = self.ctx.builder();

        let depth = depths.get(&call.callee.0).copied().unwrap_or(0);
        if depth >= self.settings.unwind_bound {
            // The unwind bound cuts this path.
            debug!(
                callee = self.system.cfa(call.callee).name(),
                depth, "unwind bound reached, dropping call edge"
            );
            return Ok(None);
        }
        let mut child_depths = depths.clone();
        child_depths.insert(call.callee.0, depth + 1);

        // Fresh variables for every callee variable.
        let callee = self.system.cfa(call.callee);
        let mut child_map = HashMap::new();
        for var in callee.inputs().iter().chain(callee.locals()) {
            let fresh = self.fresh_copy(*var)?;
            child_map.insert(*var, fresh);
        }

        let mut conjuncts = vec![source_reach];
        for (callee_var, actual) in &call.inputs {
            let actual = self.substitute(*actual, caller_subst);
            let bound = builder.var_ref(child_map[callee_var]);
            conjuncts.push(builder.eq(bound, actual).map_err(BmcError::Context)?);
        }
        let child_prefix = builder.and_many(&conjuncts).map_err(BmcError::Context)?;

        let exit_reach = self.encode_instance(
            call.callee,
            child_prefix,
            child_map.clone(),
            Some((caller, transition.source, t_id)),
            &child_depths,
        )?;
        let Some(exit_reach) = exit_reach else {
            return Ok(None);
        };

        let mut result = vec![exit_reach];
        for (callee_out, caller_var) in &call.outputs {
            let caller_side = match caller_subst.get(caller_var) {
                Some(expr) => *expr,
                None => builder.var_ref(*caller_var),
            };
            let callee_side = builder.var_ref(child_map[callee_out]);
            result.push(
                builder
                    .eq(caller_side, callee_side)
                    .map_err(BmcError::Context)?,
            );
        }
        Ok(Some(
            builder.and_many(&result).map_err(BmcError::Context)?,
        ))
    }

    /// Guard and assignment formula of an assign transition, over the
    /// automaton's own variables. Memoized per transition; assignments from
    /// `Undef` contribute no constraint, leaving the target unconstrained.
    fn assign_template(
        &mut self,
        cfa_id: CfaId,
        t_id: TransitionId,
        transition: &Transition,
    ) -> BmcResult<ExprId> {
        if let Some(cached) = self.assign_cache.get(&(cfa_id.0, t_id.0)) {
            return Ok(*cached);
        }
        let builder = self.ctx.builder();
        let mut conjuncts = vec![transition.guard];
        if let TransitionKind::Assign(assigns) = &transition.kind {
            for assign in assigns {
                if self.ctx.expr_kind(assign.value) == ExprKind::Undef {
                    continue;
                }
                conjuncts.push(
                    builder
                        .eq(builder.var_ref(assign.variable), assign.value)
                        .map_err(BmcError::Context)?,
                );
            }
        }
        let formula = builder.and_many(&conjuncts).map_err(BmcError::Context)?;
        self.assign_cache.insert((cfa_id.0, t_id.0), formula);
        Ok(formula)
    }

    fn substitute(&self, expr: ExprId, subst: &HashMap<VarId, ExprId>) -> ExprId {
        if subst.is_empty() {
            expr
        } else {
            self.ctx.replace_vars(expr, subst)
        }
    }

    fn fresh_pred_var(&mut self, loc: LocationId) -> BmcResult<VarId> {
        let ty = match self.settings.int_representation {
            IntRepresentation::BitVectors => self.ctx.bv_type(32),
            IntRepresentation::Integers => self.ctx.int_type(),
        };
        let name = format!("__pred{}_{}", loc.0, self.fresh);
        self.fresh += 1;
        Ok(self.ctx.create_variable(&name, ty)?)
    }

    fn fresh_copy(&mut self, var: VarId) -> BmcResult<VarId> {
        let variable = self.ctx.variable(var);
        let name = format!("{}'{}", variable.name(), self.fresh);
        self.fresh += 1;
        Ok(self.ctx.create_variable(&name, variable.ty())?)
    }

    fn location_constant(&self, loc: LocationId) -> ExprId {
        let builder = self.ctx.builder();
        match self.settings.int_representation {
            IntRepresentation::BitVectors => builder.bv_lit(loc.0 as u128, 32),
            IntRepresentation::Integers => builder.int_lit(loc.0 as i128),
        }
    }
}

/// Topological order of an automaton's locations. The location graph is
/// acyclic once loops are lowered to calls, so a reverse post-order over
/// the outgoing transitions (in insertion order) places every source before
/// its targets.
pub fn location_topo_order(cfa: &Cfa) -> Vec<LocationId> {
    let n = cfa.num_locations();
    let mut state = vec![0u8; n];
    let mut postorder = Vec::with_capacity(n);
    let mut stack: Vec<(LocationId, usize)> = vec![(cfa.entry(), 0)];
    state[cfa.entry().0 as usize] = 1;

    while let Some((loc, idx)) = stack.pop() {
        let outgoing = cfa.location(loc).outgoing();
        if idx < outgoing.len() {
            stack.push((loc, idx + 1));
            let next = cfa.transition(outgoing[idx]).target;
            if state[next.0 as usize] == 0 {
                state[next.0 as usize] = 1;
                stack.push((next, 0));
            }
        } else {
            postorder.push(loc);
        }
    }

    postorder.reverse();
    postorder
}
