// builder.rs — Module construction through insertion points
//
// `ModuleBuilder` owns the output `Module`. Instructions are appended at an
// `InsertionPoint`, which names the end of one function body. Each
// constructor allocates the result value and records its type.

use crate::diag::{CodegenError, LowerError};
use crate::lir::{
    AffineMap, Attr, CastKind, ElementType, FuncParam, Function, Instr, IrType, IteratorType,
    Module, Op, Value, VectorType,
};

/// Opaque position in the output module: the end of a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPoint {
    func: usize,
}

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    /// Create a function with the given parameters and return its entry
    /// insertion point plus the parameter values, in order.
    pub fn add_function(
        &mut self,
        name: &str,
        params: Vec<(String, IrType)>,
        grid: Vec<i64>,
    ) -> (InsertionPoint, Vec<Value>) {
        let mut values = Vec::with_capacity(params.len());
        let mut func_params = Vec::with_capacity(params.len());
        for (pname, ty) in params {
            let value = self.module.new_value(ty.clone());
            values.push(value);
            func_params.push(FuncParam {
                name: pname,
                ty,
                value,
            });
        }
        self.module.functions.push(Function {
            name: name.to_string(),
            params: func_params,
            grid,
            body: Vec::new(),
        });
        let ip = InsertionPoint {
            func: self.module.functions.len() - 1,
        };
        (ip, values)
    }

    pub fn function(&self, ip: InsertionPoint) -> &Function {
        &self.module.functions[ip.func]
    }

    pub fn type_of(&self, value: Value) -> Result<&IrType, LowerError> {
        self.module
            .value_type(value)
            .ok_or_else(|| CodegenError::UnknownReference(format!("value {value}")).into())
    }

    /// The vector type of `value`, or a type mismatch error.
    pub fn vector_type_of(&self, value: Value) -> Result<VectorType, LowerError> {
        match self.type_of(value)? {
            IrType::Vector(v) => Ok(v.clone()),
            other => Err(CodegenError::TypeMismatch {
                expected: "vector".to_string(),
                found: other.to_string(),
            }
            .into()),
        }
    }

    fn push(&mut self, ip: InsertionPoint, op: Op, result_ty: Option<IrType>) -> Option<Value> {
        let result = result_ty.map(|ty| self.module.new_value(ty));
        self.module.functions[ip.func]
            .body
            .push(Instr { result, op });
        result
    }

    fn push_value(&mut self, ip: InsertionPoint, op: Op, ty: IrType) -> Value {
        let value = self.module.new_value(ty);
        self.module.functions[ip.func].body.push(Instr {
            result: Some(value),
            op,
        });
        value
    }

    /// A scalar constant of the attribute's element type.
    pub fn constant(&mut self, ip: InsertionPoint, value: Attr) -> Value {
        let ty = IrType::Scalar(value.element_type());
        self.push_value(ip, Op::Constant { value }, ty)
    }

    /// A vector constant with every lane equal to `value`.
    pub fn splat(&mut self, ip: InsertionPoint, value: Attr, shape: Vec<i64>) -> Value {
        let ty = IrType::Vector(VectorType::new(shape, value.element_type()));
        self.push_value(ip, Op::Constant { value }, ty)
    }

    pub fn index_constant(&mut self, ip: InsertionPoint, value: i64) -> Value {
        self.constant(
            ip,
            Attr::Int {
                value,
                ty: ElementType::Index,
            },
        )
    }

    pub fn zero(&mut self, ip: InsertionPoint, element: ElementType) -> Value {
        self.constant(ip, Attr::zero(element))
    }

    pub fn transfer_read(
        &mut self,
        ip: InsertionPoint,
        result: VectorType,
        source: Value,
        indices: Vec<Value>,
        permutation_map: AffineMap,
        padding: Value,
    ) -> Value {
        self.push_value(
            ip,
            Op::TransferRead {
                source,
                indices,
                permutation_map,
                padding,
            },
            IrType::Vector(result),
        )
    }

    pub fn transfer_write(
        &mut self,
        ip: InsertionPoint,
        value: Value,
        dest: Value,
        indices: Vec<Value>,
        permutation_map: AffineMap,
    ) {
        self.push(
            ip,
            Op::TransferWrite {
                value,
                dest,
                indices,
                permutation_map,
            },
            None,
        );
    }

    pub fn broadcast(&mut self, ip: InsertionPoint, result: VectorType, source: Value) -> Value {
        self.push_value(ip, Op::Broadcast { source }, IrType::Vector(result))
    }

    pub fn cast(&mut self, ip: InsertionPoint, kind: CastKind, source: Value, ty: IrType) -> Value {
        self.push_value(ip, Op::Cast { kind, source }, ty)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn contract(
        &mut self,
        ip: InsertionPoint,
        result: IrType,
        lhs: Value,
        rhs: Value,
        acc: Value,
        indexing_maps: Vec<AffineMap>,
        iterator_types: Vec<IteratorType>,
    ) -> Value {
        self.push_value(
            ip,
            Op::Contract {
                lhs,
                rhs,
                acc,
                indexing_maps,
                iterator_types,
            },
            result,
        )
    }

    pub fn ret(&mut self, ip: InsertionPoint) {
        self.push(ip, Op::Return { values: Vec::new() }, None);
    }
}
