//! Hash-consed expression arena and the [`Context`] that owns it.
//!
//! Expression nodes are a closed tagged variant stored in an arena; equality
//! is structural over `(kind, type, operand ids)` and the consing table keys
//! on the same, so two structurally equal interned terms share one id.

use std::cell::RefCell;
use std::collections::HashMap;

use smallvec::SmallVec;

use crate::builder::{BuilderMode, ExprBuilder};
use crate::symbols::{SymbolTable, VarId, Variable};
use crate::types::{FloatKind, Type, TypeId, TypeInterner};
use crate::ContextError;

/// Index of an expression node within its owning [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

/// IEEE-754 rounding mode carried by floating-point operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundingMode {
    NearestTiesToEven,
    NearestTiesToAway,
    TowardPositive,
    TowardNegative,
    TowardZero,
}

/// Expression node tag. Operands live in the node's argument list; literal
/// and variable payloads are inline so the whole kind stays `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    // Leaves
    BoolLit(bool),
    IntLit(i128),
    BvLit { width: u32, value: u128 },
    FloatLit { kind: FloatKind, bits: u128 },
    Undef,
    VarRef(VarId),

    // Boolean connectives (And/Or are variadic)
    Not,
    And,
    Or,
    Xor,
    Eq,
    NotEq,
    Select,

    // Arithmetic, shared between Int and Bv operands
    Add,
    Sub,
    Mul,
    // Int-only arithmetic (Euclidean, matching the solver's semantics)
    Div,
    Mod,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Bit-vector only
    BvSDiv,
    BvUDiv,
    BvSRem,
    BvURem,
    Shl,
    LShr,
    AShr,
    BvAnd,
    BvOr,
    BvXor,
    BvSLt,
    BvSLtEq,
    BvSGt,
    BvSGtEq,
    BvULt,
    BvULtEq,
    BvUGt,
    BvUGtEq,
    ZExt,
    SExt,
    Trunc,

    // Floating point
    FAdd(RoundingMode),
    FSub(RoundingMode),
    FMul(RoundingMode),
    FDiv(RoundingMode),
    FEq,
    FGt,
    FGtEq,
    FLt,
    FLtEq,
    FIsNan,
    FCast(RoundingMode),
    SignedToFp(RoundingMode),
    UnsignedToFp(RoundingMode),
    FpToSigned(RoundingMode),
    FpToUnsigned(RoundingMode),

    // Arrays
    Read,
    Write,
}

pub(crate) type Operands = SmallVec<[ExprId; 2]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ExprNode {
    pub(crate) kind: ExprKind,
    pub(crate) ty: TypeId,
    pub(crate) args: Operands,
}

#[derive(Debug, Default)]
pub(crate) struct ExprArena {
    nodes: Vec<ExprNode>,
    dedup: HashMap<ExprNode, ExprId>,
}

impl ExprArena {
    /// Intern a node, returning the existing id for a structurally equal one.
    pub(crate) fn intern(&mut self, node: ExprNode) -> ExprId {
        if let Some(id) = self.dedup.get(&node) {
            return *id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.dedup.insert(node, id);
        id
    }

    /// Allocate a fresh node, bypassing the consing table. Used by the
    /// non-folding builder only.
    pub(crate) fn fresh(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0 as usize]
    }
}

/// Owner of all interning state for one verification run: types, symbols and
/// the expression arena. Single-threaded; interior mutability keeps the
/// borrow surface small for the stages that share it.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) types: RefCell<TypeInterner>,
    pub(crate) symbols: RefCell<SymbolTable>,
    pub(crate) arena: RefCell<ExprArena>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    // === Types ===

    pub fn bool_type(&self) -> TypeId {
        self.types.borrow_mut().intern(Type::Bool)
    }

    pub fn int_type(&self) -> TypeId {
        self.types.borrow_mut().intern(Type::Int)
    }

    pub fn bv_type(&self, width: u32) -> TypeId {
        self.types.borrow_mut().intern(Type::Bv(width))
    }

    pub fn float_type(&self, kind: FloatKind) -> TypeId {
        self.types.borrow_mut().intern(Type::Float(kind))
    }

    pub fn array_type(&self, domain: TypeId, range: TypeId) -> TypeId {
        self.types.borrow_mut().intern(Type::Array(domain, range))
    }

    pub fn resolve_type(&self, id: TypeId) -> Type {
        self.types.borrow().resolve(id)
    }

    // === Variables ===

    /// Create a variable with a context-unique name.
    pub fn create_variable(&self, name: &str, ty: TypeId) -> Result<VarId, ContextError> {
        self.symbols.borrow_mut().create(name, ty)
    }

    pub fn find_variable(&self, name: &str) -> Option<VarId> {
        self.symbols.borrow().lookup(name)
    }

    pub fn variable(&self, id: VarId) -> Variable {
        self.symbols.borrow().get(id).clone()
    }

    pub fn var_type(&self, id: VarId) -> TypeId {
        self.symbols.borrow().get(id).ty()
    }

    pub fn num_variables(&self) -> usize {
        self.symbols.borrow().len()
    }

    // === Expressions ===

    /// The default, folding builder.
    pub fn builder(&self) -> ExprBuilder<'_> {
        ExprBuilder::new(self, BuilderMode::Folding)
    }

    /// Builder that allocates a fresh node per call and applies no rewrites.
    pub fn plain_builder(&self) -> ExprBuilder<'_> {
        ExprBuilder::new(self, BuilderMode::Plain)
    }

    pub fn expr_kind(&self, id: ExprId) -> ExprKind {
        self.arena.borrow().node(id).kind
    }

    pub fn expr_type(&self, id: ExprId) -> TypeId {
        self.arena.borrow().node(id).ty
    }

    pub fn operands(&self, id: ExprId) -> Operands {
        self.arena.borrow().node(id).args.clone()
    }

    /// Resolved type of an expression, one hop past [`Context::expr_type`].
    pub fn type_of(&self, id: ExprId) -> Type {
        self.resolve_type(self.expr_type(id))
    }

    pub(crate) fn intern_node(&self, kind: ExprKind, ty: TypeId, args: Operands) -> ExprId {
        self.arena.borrow_mut().intern(ExprNode { kind, ty, args })
    }

    pub(crate) fn fresh_node(&self, kind: ExprKind, ty: TypeId, args: Operands) -> ExprId {
        self.arena.borrow_mut().fresh(ExprNode { kind, ty, args })
    }

    /// Substitute variables in `expr` according to `map`, rebuilding interned
    /// nodes bottom-up. Replacement expressions must have the variable's
    /// type; types of rebuilt nodes are preserved. Memoized over the DAG.
    pub fn replace_vars(&self, expr: ExprId, map: &HashMap<VarId, ExprId>) -> ExprId {
        let mut memo: HashMap<ExprId, ExprId> = HashMap::new();
        self.replace_rec(expr, map, &mut memo)
    }

    fn replace_rec(
        &self,
        expr: ExprId,
        map: &HashMap<VarId, ExprId>,
        memo: &mut HashMap<ExprId, ExprId>,
    ) -> ExprId {
        if let Some(done) = memo.get(&expr) {
            return *done;
        }
        let (kind, ty, args) = {
            let arena = self.arena.borrow();
            let node = arena.node(expr);
            (node.kind, node.ty, node.args.clone())
        };
        let result = match kind {
            ExprKind::VarRef(var) => match map.get(&var) {
                Some(replacement) => *replacement,
                None => expr,
            },
            _ if args.is_empty() => expr,
            _ => {
                let new_args: Operands =
                    args.iter().map(|a| self.replace_rec(*a, map, memo)).collect();
                if new_args == args {
                    expr
                } else {
                    self.intern_node(kind, ty, new_args)
                }
            }
        };
        memo.insert(expr, result);
        result
    }

    /// Collect the distinct variables referenced by an expression, in first
    /// occurrence order.
    pub fn free_variables(&self, expr: ExprId) -> Vec<VarId> {
        let mut seen_exprs = std::collections::HashSet::new();
        let mut seen_vars = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![expr];
        while let Some(id) = stack.pop() {
            if !seen_exprs.insert(id) {
                continue;
            }
            let (kind, args) = {
                let arena = self.arena.borrow();
                let node = arena.node(id);
                (node.kind, node.args.clone())
            };
            if let ExprKind::VarRef(var) = kind {
                if seen_vars.insert(var) {
                    out.push(var);
                }
            }
            // Depth-first, reversed so the first operand is visited first.
            for arg in args.iter().rev() {
                stack.push(*arg);
            }
        }
        out
    }
}
