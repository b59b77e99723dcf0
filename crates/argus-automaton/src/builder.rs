//! Module-to-automata lowering.
//!
//! Each SSA function becomes one CFA whose inputs are the function
//! parameters and whose single output is the return value. Natural loops
//! are lowered innermost-first into their own automata: header phis become
//! inputs re-bound on every back edge (a self-call), live-out values become
//! outputs, and when a loop can leave towards more than one block an
//! auxiliary selector output records which exit was taken.

use std::collections::HashMap;

use tracing::{debug, info};

use argus_core::{Context, ContextError, ExprId, TypeId, VarId};
use argus_ir::{
    topological_order, BlockId, Callee, FuncId, Function, InstKind, IrType, LocalId, LoopForest,
    LoopId, Module, Terminator, Value,
};

use crate::cfa::{AutomataSystem, CfaId, DebugBinding, LocationId, NondetCall, VariableAssignment};
use crate::memory::{MemoryModel, ScopedVars};
use crate::translate::{InstTranslator, IntRepresentation, Settings, TranslateEnv};
use crate::{
    is_error_function_name, is_nondet_function_name, BuildError, BuildResult,
    FUNCTION_RETURN_VALUE_NAME, LOOP_OUTPUT_SELECTOR_NAME,
};

/// Lower a whole module into an automata system. The main automaton is the
/// function named `main`, falling back to the first definition.
pub fn translate_module(
    ctx: &Context,
    module: &Module,
    settings: Settings,
    mem: &mut dyn MemoryModel,
) -> BuildResult<AutomataSystem> {
    ModuleToCfa::new(ctx, module, settings, mem).generate()
}

/// Interface of a function automaton, visible to its callers.
#[derive(Debug, Clone)]
struct FunctionInterface {
    cfa: CfaId,
    param_vars: Vec<VarId>,
    ret_var: Option<VarId>,
}

pub struct ModuleToCfa<'ctx, 'm> {
    ctx: &'ctx Context,
    module: &'m Module,
    settings: Settings,
    mem: &'m mut dyn MemoryModel,
}

impl<'ctx, 'm> ModuleToCfa<'ctx, 'm> {
    pub fn new(
        ctx: &'ctx Context,
        module: &'m Module,
        settings: Settings,
        mem: &'m mut dyn MemoryModel,
    ) -> Self {
        ModuleToCfa {
            ctx,
            module,
            settings,
            mem,
        }
    }

    pub fn generate(mut self) -> BuildResult<AutomataSystem> {
        let mut system = AutomataSystem::new();
        let mut interfaces: HashMap<u32, FunctionInterface> = HashMap::new();

        // Shells first, so call transitions can bind callee variables
        // regardless of definition order.
        for func_id in self.module.definitions() {
            let func = self.module.function(func_id);
            let cfa_id = system.create_cfa(&func.name);
            let cfa = system.cfa_mut(cfa_id);
            let mut param_vars = Vec::new();
            for (name, ty) in &func.params {
                let ty = self.mem.translate_type(self.ctx, *ty);
                param_vars.push(cfa.create_input(self.ctx, name, ty)?);
            }
            let ret_var = match func.ret_ty {
                Some(ty) => {
                    let ty = self.mem.translate_type(self.ctx, ty);
                    let var = cfa.create_local(self.ctx, FUNCTION_RETURN_VALUE_NAME, ty)?;
                    cfa.add_output(var);
                    Some(var)
                }
                None => None,
            };
            interfaces.insert(
                func_id.0,
                FunctionInterface {
                    cfa: cfa_id,
                    param_vars,
                    ret_var,
                },
            );
        }

        for func_id in self.module.definitions() {
            let func = self.module.function(func_id);
            info!(function = func.name.as_str(), "lowering function to automata");
            let lowering = FunctionLowering::prepare(
                self.ctx,
                self.module,
                self.settings,
                self.mem,
                &interfaces,
                func_id,
                &mut system,
            )?;
            lowering.run()?;
        }

        let main = self
            .module
            .find_function("main")
            .filter(|id| !self.module.function(*id).is_declaration())
            .or_else(|| self.module.definitions().next());
        if let Some(id) = main {
            system.set_main(interfaces[&id.0].cfa);
        }

        Ok(system)
    }
}

/// Which automaton a [`GenInfo`] describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ScopeKind {
    #[default]
    Function,
    Loop(LoopId),
}

/// A value flowing into a loop from its surroundings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Param(u32),
    Local(LocalId),
}

impl Slot {
    fn to_value(self) -> Value {
        match self {
            Slot::Param(i) => Value::Param(i),
            Slot::Local(l) => Value::Local(l),
        }
    }
}

/// Where the values for phi nodes of a successor block come from.
#[derive(Debug, Clone, Copy)]
enum PhiSource {
    /// A direct edge from a specific block.
    Block(BlockId),
    /// A call-return edge out of a lowered loop.
    Loop(LoopId),
}

/// Per-automaton generation state, the moral equivalent of the variable
/// scope tables of the lowered automaton.
#[derive(Debug, Default)]
struct GenInfo {
    cfa: CfaId,
    kind: ScopeKind,
    /// Loop live-ins (function scope: the parameters).
    inputs: Vec<(Slot, VarId)>,
    /// Loop header phis, re-bound by every back edge.
    phi_inputs: Vec<(LocalId, VarId)>,
    /// Live-out locals and their dedicated output variables.
    outputs: Vec<(LocalId, VarId)>,
    exit_variable: Option<VarId>,
    /// Exit target block of the loop, with its selector constant.
    exit_blocks: Vec<(BlockId, ExprId)>,
    locals: HashMap<LocalId, VarId>,
    inlined: HashMap<LocalId, ExprId>,
    blocks: HashMap<BlockId, (LocationId, LocationId)>,
    /// Caller-side selector locals, one per called loop automaton.
    selector_locals: HashMap<u32, VarId>,
    ret_var: Option<VarId>,
    fresh_counter: u32,
}

impl GenInfo {
    fn lookup(&self, local: LocalId) -> Option<VarId> {
        if let Some((_, var)) = self.phi_inputs.iter().find(|(l, _)| *l == local) {
            return Some(*var);
        }
        if let Some((_, var)) = self
            .inputs
            .iter()
            .find(|(slot, _)| *slot == Slot::Local(local))
        {
            return Some(*var);
        }
        self.locals.get(&local).copied()
    }

    fn param_var(&self, index: u32) -> Option<VarId> {
        self.inputs
            .iter()
            .find(|(slot, _)| *slot == Slot::Param(index))
            .map(|(_, var)| *var)
    }
}

/// Variable environment handed to the instruction translator while one
/// automaton is being encoded.
struct EncodeEnv<'x> {
    ctx: &'x Context,
    system: &'x mut AutomataSystem,
    info: &'x mut GenInfo,
}

impl ScopedVars for EncodeEnv<'_> {
    fn context(&self) -> &Context {
        self.ctx
    }

    fn fresh_local(&mut self, hint: &str, ty: TypeId) -> Result<VarId, ContextError> {
        let name = format!("{}_{}", hint, self.info.fresh_counter);
        self.info.fresh_counter += 1;
        self.system
            .cfa_mut(self.info.cfa)
            .create_local(self.ctx, &name, ty)
    }
}

impl TranslateEnv for EncodeEnv<'_> {
    fn variable_for_local(&self, local: LocalId) -> Option<VarId> {
        self.info.lookup(local)
    }

    fn variable_for_param(&self, index: u32) -> Option<VarId> {
        self.info.param_var(index)
    }

    fn inlined_value(&self, local: LocalId) -> Option<ExprId> {
        self.info.inlined.get(&local).copied()
    }
}

struct FunctionLowering<'ctx, 'm, 'a> {
    ctx: &'ctx Context,
    module: &'m Module,
    settings: Settings,
    mem: &'a mut dyn MemoryModel,
    interfaces: &'a HashMap<u32, FunctionInterface>,
    system: &'a mut AutomataSystem,
    func: &'m Function,
    topo: Vec<BlockId>,
    forest: LoopForest,
    def_block: HashMap<LocalId, BlockId>,
    eliminable: HashMap<LocalId, BlockId>,
    /// Index 0 is the function scope; loop `l` lives at index `l + 1`.
    infos: Vec<GenInfo>,
}

impl<'ctx, 'm, 'a> FunctionLowering<'ctx, 'm, 'a> {
    fn prepare(
        ctx: &'ctx Context,
        module: &'m Module,
        settings: Settings,
        mem: &'a mut dyn MemoryModel,
        interfaces: &'a HashMap<u32, FunctionInterface>,
        func_id: FuncId,
        system: &'a mut AutomataSystem,
    ) -> BuildResult<Self> {
        let func = module.function(func_id);
        let topo = topological_order(func)?;
        let forest = LoopForest::analyze(func, &topo)?;

        if forest.loop_with_header(func.entry()).is_some() {
            return Err(BuildError::Unsupported {
                construct: "loop header at the function entry (no preheader)".to_string(),
                location: func.name.clone(),
            });
        }

        let mut lowering = FunctionLowering {
            ctx,
            module,
            settings,
            mem,
            interfaces,
            system,
            func,
            topo,
            forest,
            def_block: HashMap::new(),
            eliminable: HashMap::new(),
            infos: Vec::new(),
        };
        lowering.compute_definitions();
        lowering.compute_eliminable();
        lowering.build_scopes(func_id)?;
        Ok(lowering)
    }

    fn run(mut self) -> BuildResult<()> {
        // Innermost loops first, then enclosing loops, finally the function
        // body.
        for loop_id in self.forest.innermost_first() {
            self.encode_automaton(loop_id.0 as usize + 1)?;
        }
        self.encode_automaton(0)
    }

    // === Pre-passes ===

    fn compute_definitions(&mut self) {
        for (i, block) in self.func.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            for phi in &block.phis {
                self.def_block.insert(phi.result, id);
            }
            for inst in &block.insts {
                if let Some(result) = inst.result {
                    self.def_block.insert(result, id);
                }
            }
        }
    }

    /// A value defined and used exactly once in the same block, by a non-phi
    /// user, is inlined into its user instead of becoming a CFA local.
    fn compute_eliminable(&mut self) {
        struct Use {
            count: u32,
            block: BlockId,
            by_phi: bool,
        }
        let mut uses: HashMap<LocalId, Use> = HashMap::new();
        let mut record = |value: &Value, block: BlockId, by_phi: bool| {
            if let Value::Local(local) = value {
                uses.entry(*local)
                    .and_modify(|u| {
                        u.count += 1;
                        u.by_phi |= by_phi;
                    })
                    .or_insert(Use {
                        count: 1,
                        block,
                        by_phi,
                    });
            }
        };

        for (i, block) in self.func.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            for phi in &block.phis {
                for (value, _) in &phi.incoming {
                    record(value, id, true);
                }
            }
            for inst in &block.insts {
                for value in inst_operands(&inst.kind) {
                    record(&value, id, false);
                }
            }
            for value in terminator_operands(&block.terminator) {
                record(&value, id, false);
            }
        }

        for (i, block) in self.func.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            for inst in &block.insts {
                let Some(result) = inst.result else { continue };
                // Call results stay materialized: their value comes from a
                // transition binding, not from an expression.
                if matches!(inst.kind, InstKind::Call { .. }) {
                    continue;
                }
                if let Some(u) = uses.get(&result) {
                    if u.count == 1 && u.block == id && !u.by_phi {
                        self.eliminable.insert(result, id);
                    }
                }
            }
        }
    }

    // === Scope construction ===

    fn scope_index(&self, block: BlockId) -> usize {
        match self.forest.innermost_loop(block) {
            Some(l) => l.0 as usize + 1,
            None => 0,
        }
    }

    fn translate_type(&self, ty: IrType) -> TypeId {
        self.mem.translate_type(self.ctx, ty)
    }

    fn selector_type(&self) -> TypeId {
        match self.settings.int_representation {
            IntRepresentation::BitVectors => self.ctx.bv_type(32),
            IntRepresentation::Integers => self.ctx.int_type(),
        }
    }

    fn selector_constant(&self, index: u32) -> ExprId {
        let builder = self.ctx.builder();
        match self.settings.int_representation {
            IntRepresentation::BitVectors => builder.bv_lit(index as u128, 32),
            IntRepresentation::Integers => builder.int_lit(index as i128),
        }
    }

    fn build_scopes(&mut self, func_id: FuncId) -> BuildResult<()> {
        let interface = &self.interfaces[&func_id.0];

        let mut func_info = GenInfo {
            cfa: interface.cfa,
            kind: ScopeKind::Function,
            ret_var: interface.ret_var,
            ..GenInfo::default()
        };
        for (i, var) in interface.param_vars.iter().enumerate() {
            func_info.inputs.push((Slot::Param(i as u32), *var));
        }
        self.infos.push(func_info);

        for l in 0..self.forest.len() as u32 {
            let info = self.build_loop_scope(LoopId(l))?;
            self.infos.push(info);
        }

        // Locals for every non-eliminated definition, owned by the innermost
        // scope of the defining block.
        for b in self.topo.clone() {
            let scope = self.scope_index(b);
            let block = self.func.block(b);
            let is_loop_header = matches!(self.infos[scope].kind, ScopeKind::Loop(l)
                if self.forest.get(l).header == b);
            if !is_loop_header {
                for phi in &block.phis {
                    let ty = self.translate_type(phi.ty);
                    let name = self.func.local(phi.result).name.clone();
                    let var =
                        self.system
                            .cfa_mut(self.infos[scope].cfa)
                            .create_local(self.ctx, &name, ty)?;
                    self.infos[scope].locals.insert(phi.result, var);
                }
            }
            for inst in &block.insts {
                let Some(result) = inst.result else { continue };
                if self.eliminable.contains_key(&result) {
                    continue;
                }
                let local = self.func.local(result);
                let ty = self.translate_type(local.ty);
                let name = local.name.clone();
                let var = self
                    .system
                    .cfa_mut(self.infos[scope].cfa)
                    .create_local(self.ctx, &name, ty)?;
                self.infos[scope].locals.insert(result, var);
            }
        }

        Ok(())
    }

    fn build_loop_scope(&mut self, loop_id: LoopId) -> BuildResult<GenInfo> {
        let lp = self.forest.get(loop_id).clone();
        let header_name = self.func.block(lp.header).name.clone();
        let cfa_id = self
            .system
            .create_cfa(&format!("{}/{}", self.func.name, header_name));

        let mut info = GenInfo {
            cfa: cfa_id,
            kind: ScopeKind::Loop(loop_id),
            ..GenInfo::default()
        };

        // Header phis become inputs whose values are re-bound on back edges.
        for phi in &self.func.block(lp.header).phis {
            let ty = self.translate_type(phi.ty);
            let name = self.func.local(phi.result).name.clone();
            let var = self
                .system
                .cfa_mut(cfa_id)
                .create_input(self.ctx, &name, ty)?;
            info.phi_inputs.push((phi.result, var));
        }

        // Live-ins: values used inside the loop but defined outside it.
        let mut live_in: Vec<Slot> = Vec::new();
        let mut note = |slot: Slot, live_in: &mut Vec<Slot>| {
            if !live_in.contains(&slot) {
                live_in.push(slot);
            }
        };
        let member = |b: BlockId| lp.contains(b);
        for b in &lp.blocks {
            let block = self.func.block(*b);
            let mut values: Vec<Value> = Vec::new();
            for phi in &block.phis {
                for (value, from) in &phi.incoming {
                    // Initial values of header phis are bound by the caller.
                    if *b == lp.header && !member(*from) {
                        continue;
                    }
                    values.push(*value);
                }
            }
            for inst in &block.insts {
                values.extend(inst_operands(&inst.kind));
            }
            values.extend(terminator_operands(&block.terminator));

            for value in values {
                match value {
                    Value::Param(i) => note(Slot::Param(i), &mut live_in),
                    Value::Local(l) => {
                        let def = self.def_block.get(&l).copied();
                        if def.map_or(true, |d| !member(d)) {
                            note(Slot::Local(l), &mut live_in);
                        }
                    }
                    _ => {}
                }
            }
        }
        for slot in live_in {
            let (name, ty) = match slot {
                Slot::Param(i) => {
                    let (name, ty) = &self.func.params[i as usize];
                    (name.clone(), self.translate_type(*ty))
                }
                Slot::Local(l) => {
                    let local = self.func.local(l);
                    (local.name.clone(), self.translate_type(local.ty))
                }
            };
            let var = self
                .system
                .cfa_mut(cfa_id)
                .create_input(self.ctx, &name, ty)?;
            info.inputs.push((slot, var));
        }

        // Live-outs: values defined inside the loop and used after it.
        let mut live_out: Vec<LocalId> = Vec::new();
        for (i, block) in self.func.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            if member(id) {
                continue;
            }
            let block_values = {
                let mut values: Vec<Value> = Vec::new();
                for phi in &block.phis {
                    for (value, _) in &phi.incoming {
                        values.push(*value);
                    }
                }
                for inst in &block.insts {
                    values.extend(inst_operands(&inst.kind));
                }
                values.extend(terminator_operands(&block.terminator));
                values
            };
            for value in block_values {
                if let Value::Local(l) = value {
                    if self.def_block.get(&l).is_some_and(|d| member(*d))
                        && !live_out.contains(&l)
                    {
                        live_out.push(l);
                    }
                }
            }
        }
        for local in live_out {
            let info_local = self.func.local(local);
            let ty = self.translate_type(info_local.ty);
            let name = format!("{}_out", info_local.name);
            let var = self
                .system
                .cfa_mut(cfa_id)
                .create_local(self.ctx, &name, ty)?;
            self.system.cfa_mut(cfa_id).add_output(var);
            info.outputs.push((local, var));
        }

        // Exit targets, in (member block, successor) textual order. More
        // than one target requires the selector output.
        for b in &lp.blocks {
            for succ in self.func.block(*b).terminator.successors() {
                if member(succ) || info.exit_blocks.iter().any(|(t, _)| *t == succ) {
                    continue;
                }
                let constant = self.selector_constant(info.exit_blocks.len() as u32);
                info.exit_blocks.push((succ, constant));
            }
        }
        if info.exit_blocks.len() > 1 {
            let selector_type = self.selector_type();
            let var = self.system.cfa_mut(cfa_id).create_local(
                self.ctx,
                LOOP_OUTPUT_SELECTOR_NAME,
                selector_type,
            )?;
            self.system.cfa_mut(cfa_id).add_output(var);
            info.exit_variable = Some(var);
        }

        debug!(
            automaton = self.system.cfa(cfa_id).name(),
            inputs = info.inputs.len() + info.phi_inputs.len(),
            outputs = info.outputs.len(),
            exits = info.exit_blocks.len(),
            "lowered loop interface"
        );

        Ok(info)
    }

    // === Encoding ===

    fn scope_blocks(&self, idx: usize) -> Vec<BlockId> {
        self.topo
            .iter()
            .copied()
            .filter(|b| self.scope_index(*b) == idx)
            .collect()
    }

    fn encode_automaton(&mut self, idx: usize) -> BuildResult<()> {
        let mut info = std::mem::take(&mut self.infos[idx]);
        let blocks = self.scope_blocks(idx);

        // The first scope block is the function entry or the loop header;
        // its entry location is the automaton entry.
        for (i, b) in blocks.iter().enumerate() {
            let cfa = self.system.cfa_mut(info.cfa);
            let pair = if i == 0 {
                let exit = cfa.create_location();
                (cfa.entry(), exit)
            } else {
                (cfa.create_location(), cfa.create_location())
            };
            info.blocks.insert(*b, pair);
        }

        for b in &blocks {
            self.encode_block(&mut info, *b)?;
        }

        self.infos[idx] = info;
        Ok(())
    }

    fn with_translator<R>(
        &mut self,
        info: &mut GenInfo,
        f: impl FnOnce(&mut InstTranslator<'_>) -> BuildResult<R>,
    ) -> BuildResult<R> {
        let mut env = EncodeEnv {
            ctx: self.ctx,
            system: self.system,
            info,
        };
        let mut translator = InstTranslator {
            settings: self.settings,
            func: self.func,
            mem: self.mem,
            env: &mut env,
        };
        f(&mut translator)
    }

    fn assign(
        &mut self,
        info: &GenInfo,
        source: LocationId,
        target: LocationId,
        guard: ExprId,
        assignments: Vec<VariableAssignment>,
    ) -> BuildResult<()> {
        self.system
            .cfa_mut(info.cfa)
            .create_assign_transition(self.ctx, source, target, guard, assignments)?;
        Ok(())
    }

    fn encode_block(&mut self, info: &mut GenInfo, b: BlockId) -> BuildResult<()> {
        let (block_entry, block_exit) = info.blocks[&b];
        let block = self.func.block(b).clone();
        let builder = self.ctx.builder();

        let mut current = block_entry;
        let mut assignments: Vec<VariableAssignment> = Vec::new();
        let mut constraints: Vec<ExprId> = Vec::new();

        for inst in &block.insts {
            match &inst.kind {
                InstKind::Call {
                    callee: Callee::Direct(func_id),
                    args,
                } => {
                    let callee = self.module.function(*func_id);
                    let callee_name = callee.name.clone();

                    if is_error_function_name(&callee_name) {
                        let mid = self.flush(info, current, &mut assignments, &mut constraints)?;
                        let error_loc = self.system.cfa_mut(info.cfa).create_error_location();
                        if callee_name == "argus.error_code" && !args.is_empty() {
                            let code =
                                self.with_translator(info, |tr| tr.operand(&args[0]))?;
                            self.system
                                .cfa_mut(info.cfa)
                                .record_error_code(error_loc, code);
                        }
                        let t = self.ctx.builder().true_lit();
                        self.assign(info, mid, error_loc, t, Vec::new())?;
                        current = mid;
                        continue;
                    }

                    if is_nondet_function_name(&callee_name) {
                        // A nondet call with a discarded result has no
                        // observable effect.
                        let Some(result) = inst.result else { continue };
                        let variable = info
                            .lookup(result)
                            .expect("nondet result has a variable");
                        self.system.cfa_mut(info.cfa).record_nondet_call(NondetCall {
                            variable,
                            callee: callee_name,
                            location: block_entry,
                            source_loc: inst.debug_loc,
                        });
                        continue;
                    }

                    if !callee.is_declaration() {
                        // A call to a known automaton splits the block.
                        let mid = self.flush(info, current, &mut assignments, &mut constraints)?;
                        let interface = self.interfaces[&func_id.0].clone();
                        let mut inputs = Vec::new();
                        for (arg, callee_var) in args.iter().zip(&interface.param_vars) {
                            let var_ty = self.ctx.var_type(*callee_var);
                            let actual = self.with_translator(info, |tr| {
                                let e = tr.operand(arg)?;
                                tr.cast_result(e, var_ty)
                            })?;
                            inputs.push((*callee_var, actual));
                        }
                        let mut outputs = Vec::new();
                        if let Some(result) = inst.result {
                            let ret = interface
                                .ret_var
                                .expect("value-producing call targets a function with a return");
                            let caller_var =
                                info.lookup(result).expect("call result has a variable");
                            outputs.push((ret, caller_var));
                        }
                        let ret_loc = self.system.cfa_mut(info.cfa).create_location();
                        self.system.cfa_mut(info.cfa).create_call_transition(
                            self.ctx,
                            mid,
                            ret_loc,
                            interface.cfa,
                            inputs,
                            outputs,
                        )?;
                        current = ret_loc;
                        continue;
                    }

                    // External declaration: the result, if any, stays
                    // unconstrained.
                    if let Some(result) = inst.result {
                        let expr = self.with_translator(info, |tr| tr.transform(inst))?;
                        self.define(info, result, expr, &mut assignments)?;
                    }
                }
                InstKind::Call {
                    callee: Callee::Indirect(_),
                    ..
                } => {
                    // Indirect call targets are not resolved; the defined
                    // value is unconstrained.
                    if let Some(result) = inst.result {
                        let ty = self.translate_type(self.func.local(result).ty);
                        let expr = self.ctx.builder().undef(ty);
                        self.define(info, result, expr, &mut assignments)?;
                    }
                }
                InstKind::Store { address, value } => {
                    let constraint = self.with_translator(info, |tr| {
                        let address = tr.operand(address)?;
                        let value = tr.operand(value)?;
                        tr.mem.handle_store(tr.env, address, value)
                    })?;
                    if let Some(c) = constraint {
                        constraints.push(c);
                    }
                }
                InstKind::DebugBind { value, name } => {
                    let expr = self.with_translator(info, |tr| tr.operand(value))?;
                    self.system.cfa_mut(info.cfa).record_debug_binding(DebugBinding {
                        name: name.clone(),
                        value: expr,
                        location: block_entry,
                        source_loc: inst.debug_loc,
                    });
                }
                _ => {
                    let Some(result) = inst.result else { continue };
                    let expr = self.with_translator(info, |tr| tr.transform(inst))?;
                    self.define(info, result, expr, &mut assignments)?;
                }
            }
        }

        let guard = builder.and_many(&constraints).map_err(ContextError::from)?;
        self.assign(info, current, block_exit, guard, std::mem::take(&mut assignments))?;

        // Branches: one outgoing transition per successor.
        match &block.terminator {
            Terminator::Ret { value } => {
                let mut assigns = Vec::new();
                if let Some(value) = value {
                    let ret_var = info.ret_var.expect("function returning a value has RET_VAL");
                    let ty = self.ctx.var_type(ret_var);
                    let expr = self.with_translator(info, |tr| {
                        let e = tr.operand(value)?;
                        tr.cast_result(e, ty)
                    })?;
                    assigns.push(VariableAssignment {
                        variable: ret_var,
                        value: expr,
                    });
                }
                let exit = self.system.cfa(info.cfa).exit();
                let t = self.ctx.builder().true_lit();
                self.assign(info, block_exit, exit, t, assigns)?;
            }
            Terminator::Unreachable => {
                // Dead end; keep the location connected with an
                // unsatisfiable edge.
                let exit = self.system.cfa(info.cfa).exit();
                let f = self.ctx.builder().false_lit();
                self.assign(info, block_exit, exit, f, Vec::new())?;
            }
            Terminator::Br { target } => {
                let t = self.ctx.builder().true_lit();
                self.handle_successor(info, block_exit, t, *target, PhiSource::Block(b))?;
            }
            Terminator::CondBr {
                cond,
                on_true,
                on_false,
            } => {
                let cond = self.with_translator(info, |tr| {
                    let e = tr.operand(cond)?;
                    tr.as_bool(e)
                })?;
                let negated = self.ctx.builder().not(cond).map_err(ContextError::from)?;
                self.handle_successor(info, block_exit, cond, *on_true, PhiSource::Block(b))?;
                self.handle_successor(info, block_exit, negated, *on_false, PhiSource::Block(b))?;
            }
            Terminator::Switch {
                value,
                default,
                cases,
            } => {
                let scrutinee = self.with_translator(info, |tr| tr.operand(value))?;
                let width = match self.func.value_ty(value) {
                    IrType::Int(w) => w,
                    _ => {
                        return Err(BuildError::Unsupported {
                            construct: "switch on non-integer value".to_string(),
                            location: self.func.name.clone(),
                        })
                    }
                };
                let builder = self.ctx.builder();
                let mut others = Vec::new();
                for (case_value, target) in cases {
                    let constant = self.with_translator(info, |tr| {
                        tr.operand(&Value::ConstInt {
                            width,
                            value: *case_value,
                        })
                    })?;
                    let guard = builder
                        .eq(scrutinee, constant)
                        .map_err(ContextError::from)?;
                    others.push(builder.not_eq(scrutinee, constant).map_err(ContextError::from)?);
                    self.handle_successor(info, block_exit, guard, *target, PhiSource::Block(b))?;
                }
                let default_guard = builder.and_many(&others).map_err(ContextError::from)?;
                self.handle_successor(info, block_exit, default_guard, *default, PhiSource::Block(b))?;
            }
        }

        Ok(())
    }

    /// Record a defined value: inline it when eliminable, otherwise add a
    /// simultaneous assignment to its variable.
    fn define(
        &mut self,
        info: &mut GenInfo,
        result: LocalId,
        expr: ExprId,
        assignments: &mut Vec<VariableAssignment>,
    ) -> BuildResult<()> {
        if self.eliminable.contains_key(&result) {
            info.inlined.insert(result, expr);
            return Ok(());
        }
        let variable = info.lookup(result).expect("definition has a variable");
        let ty = self.ctx.var_type(variable);
        let expr = self.with_translator(info, |tr| tr.cast_result(expr, ty))?;
        assignments.push(VariableAssignment {
            variable,
            value: expr,
        });
        Ok(())
    }

    /// Flush accumulated assignments into a fresh location, returning the
    /// new encoding frontier.
    fn flush(
        &mut self,
        info: &GenInfo,
        current: LocationId,
        assignments: &mut Vec<VariableAssignment>,
        constraints: &mut Vec<ExprId>,
    ) -> BuildResult<LocationId> {
        let mid = self.system.cfa_mut(info.cfa).create_location();
        let guard = self
            .ctx
            .builder()
            .and_many(constraints)
            .map_err(ContextError::from)?;
        constraints.clear();
        self.assign(info, current, mid, guard, std::mem::take(assignments))?;
        Ok(mid)
    }

    fn handle_successor(
        &mut self,
        info: &mut GenInfo,
        from: LocationId,
        guard: ExprId,
        target: BlockId,
        phi_source: PhiSource,
    ) -> BuildResult<()> {
        if let ScopeKind::Loop(l) = info.kind {
            let lp = self.forest.get(l);
            if target == lp.header {
                // Back edge: the next iteration is a recursive call.
                return self.loop_call(info, from, guard, l, phi_source, true);
            }
            if !lp.contains(target) {
                return self.loop_exit_edge(info, from, guard, target);
            }
        }

        if info.blocks.contains_key(&target) {
            let (target_entry, _) = info.blocks[&target];
            let assigns = self.phi_assignments(info, target, phi_source)?;
            return self.assign(info, from, target_entry, guard, assigns);
        }

        // The only remaining possibility is the header of a nested loop.
        let nested = self
            .forest
            .loop_with_header(target)
            .expect("in-scope successor is a block or a nested loop header");
        self.loop_call(info, from, guard, nested, phi_source, false)
    }

    /// Simultaneous phi assignments for an edge into `target`.
    fn phi_assignments(
        &mut self,
        info: &mut GenInfo,
        target: BlockId,
        phi_source: PhiSource,
    ) -> BuildResult<Vec<VariableAssignment>> {
        let block = self.func.block(target).clone();
        let mut assigns = Vec::new();
        for phi in &block.phis {
            let value = self
                .resolve_incoming(&phi.incoming, phi_source)
                .ok_or_else(|| BuildError::Unsupported {
                    construct: format!(
                        "phi '{}' has no incoming value for the lowered edge",
                        self.func.local(phi.result).name
                    ),
                    location: self.func.name.clone(),
                })?;
            let variable = info.lookup(phi.result).expect("phi result has a variable");
            let ty = self.ctx.var_type(variable);
            let expr = self.with_translator(info, |tr| {
                let e = tr.operand(&value)?;
                tr.cast_result(e, ty)
            })?;
            assigns.push(VariableAssignment {
                variable,
                value: expr,
            });
        }
        Ok(assigns)
    }

    fn resolve_incoming(
        &self,
        incoming: &[(Value, BlockId)],
        phi_source: PhiSource,
    ) -> Option<Value> {
        match phi_source {
            PhiSource::Block(b) => incoming
                .iter()
                .find(|(_, from)| *from == b)
                .map(|(v, _)| *v),
            // Out of a loop, the first in-loop predecessor wins; predecessor
            // order is the textual order of the phi's incoming list.
            PhiSource::Loop(l) => {
                let lp = self.forest.get(l);
                incoming
                    .iter()
                    .find(|(_, from)| lp.contains(*from))
                    .map(|(v, _)| *v)
            }
        }
    }

    /// An edge leaving the loop under construction: assign every output and
    /// tag the taken exit, then move to the exit location.
    fn loop_exit_edge(
        &mut self,
        info: &mut GenInfo,
        from: LocationId,
        guard: ExprId,
        target: BlockId,
    ) -> BuildResult<()> {
        let builder = self.ctx.builder();
        let mut assigns = Vec::new();
        for (local, out_var) in info.outputs.clone() {
            // A live-out defined in a nested loop may not have surfaced in
            // this scope yet when an early exit edge is encoded.
            let inner = self.lookup_or_create_local(info, local)?;
            assigns.push(VariableAssignment {
                variable: out_var,
                value: builder.var_ref(inner),
            });
        }
        if let Some(exit_var) = info.exit_variable {
            let constant = info
                .exit_blocks
                .iter()
                .find(|(t, _)| *t == target)
                .map(|(_, c)| *c)
                .expect("exit target has a selector constant");
            assigns.push(VariableAssignment {
                variable: exit_var,
                value: constant,
            });
        }
        let exit = self.system.cfa(info.cfa).exit();
        self.assign(info, from, exit, guard, assigns)
    }

    /// Emit a call transition into a loop automaton: a back-edge self-call
    /// or the initial entry from the surrounding scope.
    fn loop_call(
        &mut self,
        info: &mut GenInfo,
        from: LocationId,
        guard: ExprId,
        callee_loop: LoopId,
        phi_source: PhiSource,
        is_back_edge: bool,
    ) -> BuildResult<()> {
        let builder = self.ctx.builder();

        // Calls carry no guard; a guarded entry goes through an extra
        // location.
        let source = if guard == builder.true_lit() {
            from
        } else {
            let mid = self.system.cfa_mut(info.cfa).create_location();
            self.assign(info, from, mid, guard, Vec::new())?;
            mid
        };

        let (callee_cfa, callee_inputs, callee_phi_inputs, callee_outputs, callee_exit_var) =
            if is_back_edge {
                (
                    info.cfa,
                    info.inputs.clone(),
                    info.phi_inputs.clone(),
                    info.outputs.clone(),
                    info.exit_variable,
                )
            } else {
                let callee = &self.infos[callee_loop.0 as usize + 1];
                (
                    callee.cfa,
                    callee.inputs.clone(),
                    callee.phi_inputs.clone(),
                    callee.outputs.clone(),
                    callee.exit_variable,
                )
            };

        let header = self.forest.get(callee_loop).header;

        let mut inputs = Vec::new();
        for (slot, callee_var) in &callee_inputs {
            let ty = self.ctx.var_type(*callee_var);
            let actual = self.with_translator(info, |tr| {
                let e = tr.operand(&slot.to_value())?;
                tr.cast_result(e, ty)
            })?;
            inputs.push((*callee_var, actual));
        }
        let header_phis = self.func.block(header).phis.clone();
        for (phi_local, callee_var) in &callee_phi_inputs {
            let phi = header_phis
                .iter()
                .find(|p| p.result == *phi_local)
                .expect("phi input corresponds to a header phi");
            let value = self
                .resolve_incoming(&phi.incoming, phi_source)
                .ok_or_else(|| BuildError::Unsupported {
                    construct: format!(
                        "loop phi '{}' has no incoming value for the entering edge",
                        self.func.local(*phi_local).name
                    ),
                    location: self.func.name.clone(),
                })?;
            let ty = self.ctx.var_type(*callee_var);
            let actual = self.with_translator(info, |tr| {
                let e = tr.operand(&value)?;
                tr.cast_result(e, ty)
            })?;
            inputs.push((*callee_var, actual));
        }

        let mut outputs = Vec::new();
        if is_back_edge {
            // The next iteration's outputs are this invocation's outputs.
            for (_, out_var) in &callee_outputs {
                outputs.push((*out_var, *out_var));
            }
            if let Some(exit_var) = callee_exit_var {
                outputs.push((exit_var, exit_var));
            }
            let exit = self.system.cfa(info.cfa).exit();
            self.system.cfa_mut(info.cfa).create_call_transition(
                self.ctx,
                source,
                exit,
                callee_cfa,
                inputs,
                outputs,
            )?;
            return Ok(());
        }

        for (local, out_var) in &callee_outputs {
            let caller_var = self.lookup_or_create_local(info, *local)?;
            outputs.push((*out_var, caller_var));
        }
        let selector = match callee_exit_var {
            Some(exit_var) => {
                let caller_var = match info.selector_locals.get(&callee_cfa.0) {
                    Some(v) => *v,
                    None => {
                        let name =
                            format!("{}_selector", self.func.block(header).name);
                        let ty = self.selector_type();
                        let var = self
                            .system
                            .cfa_mut(info.cfa)
                            .create_local(self.ctx, &name, ty)?;
                        info.selector_locals.insert(callee_cfa.0, var);
                        var
                    }
                };
                outputs.push((exit_var, caller_var));
                Some(caller_var)
            }
            None => None,
        };

        let exit_blocks = self.infos[callee_loop.0 as usize + 1].exit_blocks.clone();

        let return_loc = self.system.cfa_mut(info.cfa).create_location();
        self.system.cfa_mut(info.cfa).create_call_transition(
            self.ctx,
            source,
            return_loc,
            callee_cfa,
            inputs,
            outputs,
        )?;

        match exit_blocks.len() {
            0 => {
                // The loop never terminates; no path continues past it.
                let exit = self.system.cfa(info.cfa).exit();
                let f = self.ctx.builder().false_lit();
                self.assign(info, return_loc, exit, f, Vec::new())?;
            }
            1 => {
                let t = self.ctx.builder().true_lit();
                self.handle_successor(
                    info,
                    return_loc,
                    t,
                    exit_blocks[0].0,
                    PhiSource::Loop(callee_loop),
                )?;
            }
            _ => {
                let selector = selector.expect("multi-exit loop has a selector output");
                for (target, constant) in &exit_blocks {
                    let guard = self
                        .ctx
                        .builder()
                        .eq(self.ctx.builder().var_ref(selector), *constant)
                        .map_err(ContextError::from)?;
                    self.handle_successor(
                        info,
                        return_loc,
                        guard,
                        *target,
                        PhiSource::Loop(callee_loop),
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Find the caller-side variable for a loop live-out, creating a local
    /// on first use.
    fn lookup_or_create_local(
        &mut self,
        info: &mut GenInfo,
        local: LocalId,
    ) -> BuildResult<VarId> {
        if let Some(var) = info.lookup(local) {
            return Ok(var);
        }
        let decl = self.func.local(local);
        let ty = self.translate_type(decl.ty);
        let var = self
            .system
            .cfa_mut(info.cfa)
            .create_local(self.ctx, &decl.name, ty)?;
        info.locals.insert(local, var);
        Ok(var)
    }
}

/// Operand values of an instruction, in textual order.
fn inst_operands(kind: &InstKind) -> Vec<Value> {
    match kind {
        InstKind::Binary { lhs, rhs, .. }
        | InstKind::ICmp { lhs, rhs, .. }
        | InstKind::FCmp { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstKind::Cast { value, .. } => vec![*value],
        InstKind::Select {
            cond,
            on_true,
            on_false,
        } => vec![*cond, *on_true, *on_false],
        InstKind::Call { callee, args } => {
            let mut out = Vec::new();
            if let Callee::Indirect(v) = callee {
                out.push(*v);
            }
            out.extend(args.iter().copied());
            out
        }
        InstKind::Load { address, .. } => vec![*address],
        InstKind::Store { address, value } => vec![*address, *value],
        InstKind::Alloca { .. } => vec![],
        InstKind::GetElementPtr { base, indices } => {
            let mut out = vec![*base];
            out.extend(indices.iter().copied());
            out
        }
        InstKind::DebugBind { value, .. } => vec![*value],
    }
}

fn terminator_operands(term: &Terminator) -> Vec<Value> {
    match term {
        Terminator::CondBr { cond, .. } => vec![*cond],
        Terminator::Switch { value, .. } => vec![*value],
        Terminator::Ret { value: Some(v) } => vec![*v],
        _ => vec![],
    }
}
