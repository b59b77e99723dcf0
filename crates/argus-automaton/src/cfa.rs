//! Control-flow automaton data model.
//!
//! Locations have dense stable ids; id 0 is the entry and id 1 the exit.
//! Transitions either perform a guarded simultaneous assignment or call
//! another automaton of the system, binding its inputs and outputs.

use std::collections::HashSet;

use argus_core::{Context, ContextError, ExprId, TypeId, VarId};
use argus_ir::SourceLoc;

/// Index of a location within its CFA. Dense and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(pub u32);

/// Index of a transition within its CFA, in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId(pub u32);

/// Index of a CFA within its [`AutomataSystem`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CfaId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Normal,
    /// Reaching this location constitutes a verification failure.
    Error,
}

#[derive(Debug, Clone)]
pub struct Location {
    id: LocationId,
    kind: LocationKind,
    incoming: Vec<TransitionId>,
    outgoing: Vec<TransitionId>,
}

impl Location {
    pub fn id(&self) -> LocationId {
        self.id
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn is_error(&self) -> bool {
        self.kind == LocationKind::Error
    }

    pub fn incoming(&self) -> &[TransitionId] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[TransitionId] {
        &self.outgoing
    }

    pub fn num_incoming(&self) -> usize {
        self.incoming.len()
    }

    pub fn num_outgoing(&self) -> usize {
        self.outgoing.len()
    }
}

/// One element of a simultaneous assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableAssignment {
    pub variable: VarId,
    pub value: ExprId,
}

/// Binding of a call transition to its callee automaton.
#[derive(Debug, Clone)]
pub struct CallTransition {
    pub callee: CfaId,
    /// Callee input variable, bound to an expression over the caller's scope.
    pub inputs: Vec<(VarId, ExprId)>,
    /// Callee output variable, bound to a caller local after return.
    pub outputs: Vec<(VarId, VarId)>,
}

#[derive(Debug, Clone)]
pub enum TransitionKind {
    /// All right-hand sides are evaluated in the pre-state.
    Assign(Vec<VariableAssignment>),
    Call(CallTransition),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub source: LocationId,
    pub target: LocationId,
    /// Boolean guard; call transitions always carry `true`.
    pub guard: ExprId,
    pub kind: TransitionKind,
}

/// Nondeterministic input call site recorded for trace emission.
#[derive(Debug, Clone)]
pub struct NondetCall {
    pub variable: VarId,
    pub callee: String,
    /// Entry location of the block containing the call.
    pub location: LocationId,
    pub source_loc: Option<SourceLoc>,
}

/// Value-to-source-name binding from a front-end debug annotation.
#[derive(Debug, Clone)]
pub struct DebugBinding {
    pub name: String,
    pub value: ExprId,
    /// Entry location of the block containing the annotation.
    pub location: LocationId,
    pub source_loc: Option<SourceLoc>,
}

/// A control-flow automaton.
#[derive(Debug, Clone)]
pub struct Cfa {
    name: String,
    locations: Vec<Location>,
    transitions: Vec<Transition>,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    locals: Vec<VarId>,
    /// Error payloads per error location, when the front end supplied one.
    error_codes: Vec<(LocationId, ExprId)>,
    nondet_calls: Vec<NondetCall>,
    debug_bindings: Vec<DebugBinding>,
}

pub const ENTRY: LocationId = LocationId(0);
pub const EXIT: LocationId = LocationId(1);

impl Cfa {
    fn new(name: String) -> Self {
        let mut cfa = Cfa {
            name,
            locations: Vec::new(),
            transitions: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            locals: Vec::new(),
            error_codes: Vec::new(),
            nondet_calls: Vec::new(),
            debug_bindings: Vec::new(),
        };
        // Ids 0 and 1 are reserved for entry and exit.
        cfa.create_location();
        cfa.create_location();
        cfa
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> LocationId {
        ENTRY
    }

    pub fn exit(&self) -> LocationId {
        EXIT
    }

    pub fn create_location(&mut self) -> LocationId {
        let id = LocationId(self.locations.len() as u32);
        self.locations.push(Location {
            id,
            kind: LocationKind::Normal,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        });
        id
    }

    pub fn create_error_location(&mut self) -> LocationId {
        let id = self.create_location();
        self.locations[id.0 as usize].kind = LocationKind::Error;
        id
    }

    pub fn location(&self, id: LocationId) -> &Location {
        &self.locations[id.0 as usize]
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    pub fn error_locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.locations
            .iter()
            .filter(|l| l.is_error())
            .map(|l| l.id)
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.0 as usize]
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Create an input variable, scoped as `<cfa>/<name>`.
    pub fn create_input(&mut self, ctx: &Context, name: &str, ty: TypeId) -> Result<VarId, ContextError> {
        let var = ctx.create_variable(&self.scoped(name), ty)?;
        self.inputs.push(var);
        Ok(var)
    }

    /// Create a local variable, scoped as `<cfa>/<name>`.
    pub fn create_local(&mut self, ctx: &Context, name: &str, ty: TypeId) -> Result<VarId, ContextError> {
        let var = ctx.create_variable(&self.scoped(name), ty)?;
        self.locals.push(var);
        Ok(var)
    }

    /// Mark an existing local as an output of this automaton.
    pub fn add_output(&mut self, var: VarId) {
        if !self.outputs.contains(&var) {
            self.outputs.push(var);
        }
    }

    fn scoped(&self, name: &str) -> String {
        format!("{}/{}", self.name, name)
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn locals(&self) -> &[VarId] {
        &self.locals
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    /// Whether a variable is owned by this automaton (input or local).
    pub fn owns(&self, var: VarId) -> bool {
        self.inputs.contains(&var) || self.locals.contains(&var)
    }

    pub fn record_error_code(&mut self, location: LocationId, code: ExprId) {
        self.error_codes.push((location, code));
    }

    pub fn error_code(&self, location: LocationId) -> Option<ExprId> {
        self.error_codes
            .iter()
            .find(|(l, _)| *l == location)
            .map(|(_, e)| *e)
    }

    pub fn record_nondet_call(&mut self, call: NondetCall) {
        self.nondet_calls.push(call);
    }

    pub fn nondet_calls(&self) -> &[NondetCall] {
        &self.nondet_calls
    }

    pub fn record_debug_binding(&mut self, binding: DebugBinding) {
        self.debug_bindings.push(binding);
    }

    pub fn debug_bindings(&self) -> &[DebugBinding] {
        &self.debug_bindings
    }

    fn check_edge(
        &self,
        source: LocationId,
        target: LocationId,
    ) -> Result<(), ContextError> {
        if target == ENTRY {
            return Err(self.malformed("transition into the entry location"));
        }
        if source == EXIT {
            return Err(self.malformed("transition out of the exit location"));
        }
        if source.0 as usize >= self.locations.len() || target.0 as usize >= self.locations.len() {
            return Err(self.malformed("transition endpoint does not exist"));
        }
        Ok(())
    }

    fn malformed(&self, reason: &str) -> ContextError {
        ContextError::MalformedCfa {
            automaton: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Create a guarded simultaneous assignment transition.
    pub fn create_assign_transition(
        &mut self,
        ctx: &Context,
        source: LocationId,
        target: LocationId,
        guard: ExprId,
        assignments: Vec<VariableAssignment>,
    ) -> Result<TransitionId, ContextError> {
        self.check_edge(source, target)?;
        if !ctx.type_of(guard).is_bool() {
            return Err(self.malformed("transition guard is not Boolean"));
        }
        for assign in &assignments {
            if !self.locals.contains(&assign.variable) {
                return Err(
                    self.malformed("assignment target is not a local or output of this automaton")
                );
            }
            if ctx.var_type(assign.variable) != ctx.expr_type(assign.value) {
                return Err(self.malformed("assignment value type differs from target"));
            }
        }
        Ok(self.push_transition(Transition {
            source,
            target,
            guard,
            kind: TransitionKind::Assign(assignments),
        }))
    }

    /// Create a call transition. The guard of a call is always `true`; a
    /// guarded call is modeled by an assign transition into its source.
    pub fn create_call_transition(
        &mut self,
        ctx: &Context,
        source: LocationId,
        target: LocationId,
        callee: CfaId,
        inputs: Vec<(VarId, ExprId)>,
        outputs: Vec<(VarId, VarId)>,
    ) -> Result<TransitionId, ContextError> {
        self.check_edge(source, target)?;
        for (callee_var, actual) in &inputs {
            if ctx.var_type(*callee_var) != ctx.expr_type(*actual) {
                return Err(self.malformed("call input type differs from callee input"));
            }
        }
        for (_, caller_var) in &outputs {
            if !self.locals.contains(caller_var) {
                return Err(
                    self.malformed("call output target is not a local of this automaton")
                );
            }
        }
        let guard = ctx.builder().true_lit();
        Ok(self.push_transition(Transition {
            source,
            target,
            guard,
            kind: TransitionKind::Call(CallTransition {
                callee,
                inputs,
                outputs,
            }),
        }))
    }

    fn push_transition(&mut self, transition: Transition) -> TransitionId {
        let id = TransitionId(self.transitions.len() as u32);
        self.locations[transition.source.0 as usize].outgoing.push(id);
        self.locations[transition.target.0 as usize].incoming.push(id);
        self.transitions.push(transition);
        id
    }

    /// Full structural check: variable scoping of guards and assignments,
    /// and reachability of every location from the entry.
    pub fn validate(&self, ctx: &Context) -> Result<(), ContextError> {
        let scope: HashSet<VarId> = self
            .inputs
            .iter()
            .chain(self.locals.iter())
            .copied()
            .collect();

        for transition in &self.transitions {
            for var in ctx.free_variables(transition.guard) {
                if !scope.contains(&var) {
                    return Err(self.malformed("guard references an out-of-scope variable"));
                }
            }
            if let TransitionKind::Assign(assigns) = &transition.kind {
                for assign in assigns {
                    for var in ctx.free_variables(assign.value) {
                        if !scope.contains(&var) {
                            return Err(
                                self.malformed("assignment references an out-of-scope variable")
                            );
                        }
                    }
                }
            }
        }

        let mut reached = HashSet::new();
        let mut work = vec![ENTRY];
        while let Some(loc) = work.pop() {
            if !reached.insert(loc) {
                continue;
            }
            for t in &self.locations[loc.0 as usize].outgoing {
                work.push(self.transitions[t.0 as usize].target);
            }
        }
        for location in &self.locations {
            if !reached.contains(&location.id) {
                return Err(self.malformed("location unreachable from the entry"));
            }
        }
        Ok(())
    }
}

/// Ordered set of automata with a designated main.
#[derive(Debug, Default)]
pub struct AutomataSystem {
    cfas: Vec<Cfa>,
    main: Option<CfaId>,
}

impl AutomataSystem {
    pub fn new() -> Self {
        AutomataSystem::default()
    }

    pub fn create_cfa(&mut self, name: &str) -> CfaId {
        let id = CfaId(self.cfas.len() as u32);
        self.cfas.push(Cfa::new(name.to_string()));
        id
    }

    pub fn cfa(&self, id: CfaId) -> &Cfa {
        &self.cfas[id.0 as usize]
    }

    pub fn cfa_mut(&mut self, id: CfaId) -> &mut Cfa {
        &mut self.cfas[id.0 as usize]
    }

    pub fn set_main(&mut self, id: CfaId) {
        self.main = Some(id);
    }

    pub fn main(&self) -> Option<CfaId> {
        self.main
    }

    pub fn len(&self) -> usize {
        self.cfas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cfas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CfaId, &Cfa)> {
        self.cfas
            .iter()
            .enumerate()
            .map(|(i, c)| (CfaId(i as u32), c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_create_cfa() {
        let ctx = Context::new();
        let mut system = AutomataSystem::new();
        let id = system.create_cfa("Test");
        let cfa = system.cfa_mut(id);

        // Entry and exit exist from the start, with reserved ids 0 and 1.
        assert_eq!(cfa.num_locations(), 2);
        assert_eq!(cfa.entry(), LocationId(0));
        assert_eq!(cfa.exit(), LocationId(1));

        let loc2 = cfa.create_location();
        let loc3 = cfa.create_location();
        let loc4 = cfa.create_location();
        assert_eq!(cfa.num_locations(), 5);
        assert_eq!(loc2, LocationId(2));
        assert_eq!(loc3, LocationId(3));
        assert_eq!(loc4, LocationId(4));

        let in1 = cfa.create_input(&ctx, "in1", ctx.bool_type()).unwrap();
        let tmp = cfa.create_local(&ctx, "tmp", ctx.bool_type()).unwrap();
        let out1 = cfa.create_local(&ctx, "out1", ctx.bool_type()).unwrap();
        cfa.add_output(out1);

        assert_eq!(cfa.num_inputs(), 1);
        assert_eq!(cfa.num_outputs(), 1);
        assert_eq!(cfa.num_locals(), 2);

        assert_eq!(ctx.variable(in1).name(), "Test/in1");
        assert_eq!(ctx.variable(tmp).name(), "Test/tmp");
        assert_eq!(ctx.variable(out1).name(), "Test/out1");

        let builder = ctx.builder();
        let guard = builder.var_ref(in1);
        let negated = builder.not(guard).unwrap();
        let entry = cfa.entry();
        let edge1 = cfa
            .create_assign_transition(&ctx, entry, loc2, guard, vec![])
            .unwrap();
        let edge2 = cfa
            .create_assign_transition(&ctx, entry, loc3, negated, vec![])
            .unwrap();

        assert_eq!(cfa.num_transitions(), 2);
        assert_eq!(cfa.location(cfa.entry()).num_outgoing(), 2);
        assert_eq!(cfa.location(loc2).num_incoming(), 1);
        assert_eq!(cfa.location(loc3).num_incoming(), 1);
        assert_eq!(cfa.transition(edge1).source, cfa.entry());
        assert_eq!(cfa.transition(edge2).source, cfa.entry());
        assert_eq!(cfa.transition(edge1).target, loc2);
        assert_eq!(cfa.transition(edge2).target, loc3);
    }

    #[test]
    fn malformed_transitions_are_rejected() {
        let ctx = Context::new();
        let mut system = AutomataSystem::new();
        let id = system.create_cfa("Bad");
        let cfa = system.cfa_mut(id);
        let loc = cfa.create_location();
        let builder = ctx.builder();

        // Into the entry.
        let entry = cfa.entry();
        assert!(cfa
            .create_assign_transition(&ctx, loc, entry, builder.true_lit(), vec![])
            .is_err());
        // Out of the exit.
        let exit = cfa.exit();
        assert!(cfa
            .create_assign_transition(&ctx, exit, loc, builder.true_lit(), vec![])
            .is_err());
        // Non-Boolean guard.
        assert!(cfa
            .create_assign_transition(&ctx, entry, loc, builder.int_lit(1), vec![])
            .is_err());
        // Assignment to a variable of another automaton.
        let other_id = system.create_cfa("Other");
        let foreign = system
            .cfa_mut(other_id)
            .create_local(&ctx, "x", ctx.bool_type())
            .unwrap();
        let cfa = system.cfa_mut(id);
        assert!(cfa
            .create_assign_transition(
                &ctx,
                entry,
                loc,
                builder.true_lit(),
                vec![VariableAssignment {
                    variable: foreign,
                    value: builder.true_lit(),
                }],
            )
            .is_err());
    }

    #[test]
    fn validate_checks_scope_and_reachability() {
        let ctx = Context::new();
        let mut system = AutomataSystem::new();
        let id = system.create_cfa("V");
        let other = system.create_cfa("W");
        let foreign = system
            .cfa_mut(other)
            .create_local(&ctx, "y", ctx.bool_type())
            .unwrap();

        let cfa = system.cfa_mut(id);
        let builder = ctx.builder();
        let entry = cfa.entry();
        let exit = cfa.exit();
        cfa.create_assign_transition(&ctx, entry, exit, builder.true_lit(), vec![])
            .unwrap();
        cfa.validate(&ctx).unwrap();

        // A guard over a foreign variable is out of scope.
        let loc = cfa.create_location();
        cfa.create_assign_transition(&ctx, entry, loc, builder.var_ref(foreign), vec![])
            .unwrap();
        assert!(cfa.validate(&ctx).is_err());
    }
}
