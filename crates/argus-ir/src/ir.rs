//! In-memory SSA form: modules, functions, blocks, instructions.

use argus_core::FloatKind;

/// Index of a function within its [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Index of a basic block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of an SSA local (a value defined by an instruction or phi).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Front-end value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    /// Fixed-width integer; `Int(1)` is the branch-condition type.
    Int(u32),
    Float(FloatKind),
    Ptr,
}

/// An operand: a reference to an SSA definition or an immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Local(LocalId),
    Param(u32),
    ConstInt { width: u32, value: i128 },
    ConstFloat { kind: FloatKind, bits: u128 },
    Undef(IrType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    /// And/Or/Xor, which lower as Boolean connectives on i1 operands.
    pub fn is_logic(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl ICmpPred {
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ICmpPred::Ugt | ICmpPred::Uge | ICmpPred::Ult | ICmpPred::Ule
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpPred {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    True,
}

impl FCmpPred {
    /// Ordered predicates are false when either operand is NaN.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            FCmpPred::Oeq
                | FCmpPred::Ogt
                | FCmpPred::Oge
                | FCmpPred::Olt
                | FCmpPred::Ole
                | FCmpPred::One
                | FCmpPred::Ord
        )
    }

    /// Unordered predicates are true when either operand is NaN.
    pub fn is_unordered(self) -> bool {
        matches!(
            self,
            FCmpPred::Ueq
                | FCmpPred::Ugt
                | FCmpPred::Uge
                | FCmpPred::Ult
                | FCmpPred::Ule
                | FCmpPred::Une
                | FCmpPred::Uno
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
    FpExt,
    FpTrunc,
    SiToFp,
    UiToFp,
    FpToSi,
    FpToUi,
    PtrToInt,
    IntToPtr,
    BitCast,
}

/// Call target: a function in the module or a computed address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callee {
    Direct(FuncId),
    Indirect(Value),
}

/// Source position attached to an instruction by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone)]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    ICmp {
        pred: ICmpPred,
        lhs: Value,
        rhs: Value,
    },
    FCmp {
        pred: FCmpPred,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        value: Value,
        to: IrType,
    },
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },
    Call {
        callee: Callee,
        args: Vec<Value>,
    },
    Load {
        address: Value,
        ty: IrType,
    },
    Store {
        address: Value,
        value: Value,
    },
    Alloca {
        allocated: IrType,
    },
    GetElementPtr {
        base: Value,
        indices: Vec<Value>,
    },
    /// Front-end debug annotation binding a value to a source-level name,
    /// emitted for inlined globals. Carried through to trace events.
    DebugBind {
        value: Value,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub struct Inst {
    /// SSA local defined by this instruction, if it produces a value.
    pub result: Option<LocalId>,
    pub kind: InstKind,
    pub debug_loc: Option<SourceLoc>,
}

/// A phi node. Incoming pairs follow the textual order of predecessors.
#[derive(Debug, Clone)]
pub struct Phi {
    pub result: LocalId,
    pub ty: IrType,
    pub incoming: Vec<(Value, BlockId)>,
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        on_true: BlockId,
        on_false: BlockId,
    },
    Switch {
        value: Value,
        default: BlockId,
        cases: Vec<(i128, BlockId)>,
    },
    Ret {
        value: Option<Value>,
    },
    Unreachable,
}

impl Terminator {
    /// Successor blocks in textual order. The default arm of a switch comes
    /// last, matching the order its guards are built in.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br { target } => vec![*target],
            Terminator::CondBr {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Terminator::Switch { default, cases, .. } => {
                let mut succs: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                succs.push(*default);
                succs
            }
            Terminator::Ret { .. } | Terminator::Unreachable => vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub phis: Vec<Phi>,
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

/// Name and type of an SSA local, for diagnostics and variable creation.
#[derive(Debug, Clone)]
pub struct LocalInfo {
    pub name: String,
    pub ty: IrType,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, IrType)>,
    pub ret_ty: Option<IrType>,
    /// Block 0 is the entry. A function with no blocks is a declaration.
    pub blocks: Vec<Block>,
    pub locals: Vec<LocalInfo>,
}

impl Function {
    pub fn new(name: &str, params: Vec<(String, IrType)>, ret_ty: Option<IrType>) -> Self {
        Function {
            name: name.to_string(),
            params,
            ret_ty,
            blocks: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Declare an external function (no body).
    pub fn declare(name: &str, params: Vec<(String, IrType)>, ret_ty: Option<IrType>) -> Self {
        Function::new(name, params, ret_ty)
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.to_string(),
            phis: Vec::new(),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
        });
        id
    }

    pub fn add_local(&mut self, name: &str, ty: IrType) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalInfo {
            name: name.to_string(),
            ty,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn local(&self, id: LocalId) -> &LocalInfo {
        &self.locals[id.0 as usize]
    }

    pub fn push_inst(&mut self, block: BlockId, inst: Inst) {
        self.block_mut(block).insts.push(inst);
    }

    pub fn push_phi(&mut self, block: BlockId, phi: Phi) {
        self.block_mut(block).phis.push(phi);
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.block_mut(block).terminator = term;
    }

    pub fn param_ty(&self, index: u32) -> IrType {
        self.params[index as usize].1
    }

    /// Type of a value in the scope of this function.
    pub fn value_ty(&self, value: &Value) -> IrType {
        match value {
            Value::Local(id) => self.local(*id).ty,
            Value::Param(i) => self.param_ty(*i),
            Value::ConstInt { width, .. } => IrType::Int(*width),
            Value::ConstFloat { kind, .. } => IrType::Float(*kind),
            Value::Undef(ty) => *ty,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// Functions with a body, in module order.
    pub fn definitions(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_declaration())
            .map(|(i, _)| FuncId(i as u32))
    }
}
