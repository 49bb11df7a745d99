//! WebAssembly backend.
//!
//! Each IR function is encoded on its own into a raw wasm function body
//! plus a readable text listing; [`assemble`] then stitches the bodies
//! into one module. Per-function emission only reads the shared
//! [`IrProgram`] (for call and global indices), so distinct functions can
//! be emitted on different threads.
//!
//! Value mapping: `int`, `bool`, `char` and array references are `i32`,
//! `float` is `f64`, `void` has no value. Arrays live in linear memory
//! as an 8-byte header holding the length followed by the elements; they
//! are bump-allocated through global 0, the heap pointer. Program
//! globals start at global index 1.

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, ExportKind, ExportSection, Function, FunctionSection,
    GlobalSection, GlobalType, Instruction, MemArg, MemorySection, MemoryType, Module,
    StartSection, TypeSection, ValType,
};

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::CoreError;
use crate::ir::{INIT_FUNCTION, IrExpr, IrExprKind, IrFunction, IrProgram, Op, visit_ops};
use crate::types::Type;

/// Global holding the next free heap address.
pub const HEAP_POINTER: u32 = 0;
/// First heap address; address 0 is never handed out.
pub const HEAP_BASE: i32 = 16;
/// Initial linear memory size in 64 KiB pages.
pub const MEMORY_PAGES: u64 = 16;
/// Bytes before the first array element (the length lives here).
const ARRAY_HEADER: u64 = 8;

/// Backend output for one function, in declaration order by `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFunction {
    pub index: usize,
    pub name: String,
    /// Raw code-section body; `None` when emission failed.
    pub body: Option<Vec<u8>>,
    pub listing: String,
}

/// Encode one function. Failures are reported to `sink` and leave the
/// body empty; they never affect other functions.
pub fn emit_function(
    program: &IrProgram,
    index: usize,
    function: &IrFunction,
    sink: &Diagnostics,
) -> EmittedFunction {
    let result = FunctionEmitter::new(program, function).and_then(FunctionEmitter::finish);
    match result {
        Ok((body, listing)) => EmittedFunction {
            index,
            name: function.name.clone(),
            body: Some(body),
            listing,
        },
        Err(reason) => {
            sink.push(Diagnostic::new(
                DiagnosticKind::EmissionError,
                format!("cannot emit `{}`: {reason}", function.name),
                function.line,
                function.column,
            ));
            EmittedFunction {
                index,
                name: function.name.clone(),
                body: None,
                listing: String::new(),
            }
        }
    }
}

/// Map a value type; `Ok(None)` is `void`.
pub fn val_type(ty: &Type) -> Result<Option<ValType>, String> {
    match ty {
        Type::Int | Type::Bool | Type::Char | Type::Array(_) => Ok(Some(ValType::I32)),
        Type::Float => Ok(Some(ValType::F64)),
        Type::Void => Ok(None),
        Type::String => Err("`string` values have no WebAssembly representation".into()),
        Type::Error => Err("a value has an unresolved type".into()),
    }
}

fn value_type(ty: &Type) -> Result<ValType, String> {
    val_type(ty)?.ok_or_else(|| "`void` used as a value".to_string())
}

fn val_name(ty: ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        _ => "ref",
    }
}

struct Signature {
    params: Vec<ValType>,
    result: Option<ValType>,
}

fn signature(function: &IrFunction) -> Result<Signature, String> {
    let params = function
        .params
        .iter()
        .map(|param| value_type(&param.ty))
        .collect::<Result<Vec<_>, _>>()?;
    let result = val_type(&function.return_type)?;
    Ok(Signature { params, result })
}

fn element_size(element: &Type) -> u64 {
    if *element == Type::Float { 8 } else { 4 }
}

fn mem_arg(offset: u64, size: u64) -> MemArg {
    MemArg {
        offset,
        align: if size == 8 { 3 } else { 2 },
        memory_index: 0,
    }
}

/// Branch targets of one enclosing loop, as counts of open labels.
#[derive(Clone, Copy)]
struct LoopLabels {
    exit: u32,
    resume: u32,
}

struct FunctionEmitter<'a> {
    program: &'a IrProgram,
    function: &'a IrFunction,
    func: Function,
    listing: String,
    depth: usize,
    /// Open `block`/`loop`/`if` frames.
    labels: u32,
    loops: Vec<LoopLabels>,
    next_scratch: u32,
}

impl<'a> FunctionEmitter<'a> {
    fn new(program: &'a IrProgram, function: &'a IrFunction) -> Result<Self, String> {
        let signature = signature(function)?;

        let mut header = format!("(func ${}", function.name);
        if !function.is_init() {
            header.push_str(&format!(" (export \"{}\")", function.name));
        }
        for (param, ty) in function.params.iter().zip(&signature.params) {
            header.push_str(&format!(" (param ${} {})", param.name, val_name(*ty)));
        }
        if let Some(result) = signature.result {
            header.push_str(&format!(" (result {})", val_name(result)));
        }
        header.push('\n');

        let mut locals = Vec::new();
        for local in &function.locals {
            let ty = value_type(&local.ty)?;
            header.push_str(&format!("  (local ${} {})\n", local.name, val_name(ty)));
            locals.push((1, ty));
        }
        let mut allocations = 0;
        visit_ops(&function.ops, &mut |expr| {
            if matches!(expr.kind, IrExprKind::ArrayNew(_)) {
                allocations += 1;
            }
        });
        for slot in 0..allocations {
            header.push_str(&format!("  (local $alloc{slot} i32)\n"));
            locals.push((1, ValType::I32));
        }

        Ok(FunctionEmitter {
            program,
            function,
            func: Function::new(locals),
            listing: header,
            depth: 1,
            labels: 0,
            loops: Vec::new(),
            next_scratch: function.local_count() as u32,
        })
    }

    fn finish(mut self) -> Result<(Vec<u8>, String), String> {
        let function = self.function;
        self.ops(&function.ops)?;
        if !function.return_type.is_void() {
            // Falling off the end of a value-returning function traps.
            self.emit(Instruction::Unreachable);
        }
        self.func.instruction(&Instruction::End);
        self.listing.push_str(")\n");
        Ok((self.func.into_raw_body(), self.listing))
    }

    fn line(&mut self, text: &str) {
        self.listing.push_str(&"  ".repeat(self.depth));
        self.listing.push_str(text);
        self.listing.push('\n');
    }

    fn emit(&mut self, instruction: Instruction<'_>) {
        if matches!(instruction, Instruction::End | Instruction::Else) {
            self.depth = self.depth.saturating_sub(1);
        }
        match instruction {
            Instruction::Block(_) | Instruction::Loop(_) | Instruction::If(_) => self.labels += 1,
            Instruction::End => self.labels = self.labels.saturating_sub(1),
            _ => {}
        }
        let text = wat_text(&instruction);
        self.line(&text);
        if matches!(
            instruction,
            Instruction::Block(_) | Instruction::Loop(_) | Instruction::If(_) | Instruction::Else
        ) {
            self.depth += 1;
        }
        self.func.instruction(&instruction);
    }

    fn f64_const(&mut self, value: f64) {
        self.line(&format!("f64.const {value:?}"));
        self.func.instruction(&Instruction::F64Const(value.into()));
    }

    fn call(&mut self, callee: &str) -> Result<(), String> {
        let index = self
            .program
            .functions
            .get_index_of(callee)
            .ok_or_else(|| format!("call to unknown function `{callee}`"))?;
        self.line(&format!("call ${callee}"));
        self.func.instruction(&Instruction::Call(index as u32));
        Ok(())
    }

    fn ops(&mut self, ops: &[Op]) -> Result<(), String> {
        for op in ops {
            self.op(op)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Op) -> Result<(), String> {
        match op {
            Op::Assign { local, value } => {
                self.expr(value)?;
                self.emit(Instruction::LocalSet(*local));
            }
            Op::StoreGlobal { global, value } => {
                self.expr(value)?;
                self.emit(Instruction::GlobalSet(global + 1));
            }
            Op::StoreElement {
                array,
                index,
                value,
            } => {
                let size = element_size(&value.ty);
                self.element_address(array, index, size)?;
                self.expr(value)?;
                self.store(&value.ty, ARRAY_HEADER)?;
            }
            Op::Eval(expr) => {
                self.expr(expr)?;
                if val_type(&expr.ty)?.is_some() {
                    self.emit(Instruction::Drop);
                }
            }
            Op::If {
                condition,
                then_ops,
                else_ops,
            } => {
                self.expr(condition)?;
                self.emit(Instruction::If(BlockType::Empty));
                self.ops(then_ops)?;
                if !else_ops.is_empty() {
                    self.emit(Instruction::Else);
                    self.ops(else_ops)?;
                }
                self.emit(Instruction::End);
            }
            Op::While {
                condition,
                body,
                step,
            } => self.while_loop(condition, body, step)?,
            Op::Break => {
                let depth = self.labels - self.innermost_loop("break")?.exit;
                self.emit(Instruction::Br(depth));
            }
            Op::Continue => {
                let depth = self.labels - self.innermost_loop("continue")?.resume;
                self.emit(Instruction::Br(depth));
            }
            Op::Return(value) => {
                if let Some(value) = value {
                    self.expr(value)?;
                }
                self.emit(Instruction::Return);
            }
        }
        Ok(())
    }

    /// `block (loop cond br_if body step br) end`. With a step the body
    /// sits in its own block, so `continue` lands just before the step.
    fn while_loop(&mut self, condition: &IrExpr, body: &[Op], step: &[Op]) -> Result<(), String> {
        self.emit(Instruction::Block(BlockType::Empty));
        let exit = self.labels;
        self.emit(Instruction::Loop(BlockType::Empty));
        self.expr(condition)?;
        self.emit(Instruction::I32Eqz);
        self.emit(Instruction::BrIf(1));
        if step.is_empty() {
            self.loops.push(LoopLabels {
                exit,
                resume: self.labels,
            });
            self.ops(body)?;
            self.loops.pop();
        } else {
            self.emit(Instruction::Block(BlockType::Empty));
            self.loops.push(LoopLabels {
                exit,
                resume: self.labels,
            });
            self.ops(body)?;
            self.loops.pop();
            self.emit(Instruction::End);
            self.ops(step)?;
        }
        self.emit(Instruction::Br(0));
        self.emit(Instruction::End);
        self.emit(Instruction::End);
        Ok(())
    }

    fn innermost_loop(&self, word: &str) -> Result<LoopLabels, String> {
        self.loops
            .last()
            .copied()
            .ok_or_else(|| format!("`{word}` outside of a loop"))
    }

    fn expr(&mut self, expr: &IrExpr) -> Result<(), String> {
        match &expr.kind {
            IrExprKind::Const(literal) => match literal {
                Literal::Int(value) => self.emit(Instruction::I32Const(*value)),
                Literal::Bool(value) => self.emit(Instruction::I32Const(i32::from(*value))),
                Literal::Char(value) => self.emit(Instruction::I32Const(*value as u32 as i32)),
                Literal::Float(value) => self.f64_const(*value),
                Literal::Str(_) => {
                    return Err("string literals have no WebAssembly representation".into());
                }
            },
            IrExprKind::Local(id) => self.emit(Instruction::LocalGet(*id)),
            IrExprKind::Global(id) => self.emit(Instruction::GlobalGet(id + 1)),
            IrExprKind::Unary { op, operand } => match (op, value_type(&operand.ty)?) {
                (UnaryOp::Neg, ValType::F64) => {
                    self.expr(operand)?;
                    self.emit(Instruction::F64Neg);
                }
                (UnaryOp::Neg, _) => {
                    self.emit(Instruction::I32Const(0));
                    self.expr(operand)?;
                    self.emit(Instruction::I32Sub);
                }
                (UnaryOp::Not, _) => {
                    self.expr(operand)?;
                    self.emit(Instruction::I32Eqz);
                }
            },
            IrExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                self.expr(lhs)?;
                self.emit(Instruction::If(BlockType::Result(ValType::I32)));
                self.expr(rhs)?;
                self.emit(Instruction::Else);
                self.emit(Instruction::I32Const(0));
                self.emit(Instruction::End);
            }
            IrExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                self.expr(lhs)?;
                self.emit(Instruction::If(BlockType::Result(ValType::I32)));
                self.emit(Instruction::I32Const(1));
                self.emit(Instruction::Else);
                self.expr(rhs)?;
                self.emit(Instruction::End);
            }
            IrExprKind::Binary { op, lhs, rhs } => {
                let operand = value_type(&lhs.ty)?;
                self.expr(lhs)?;
                self.expr(rhs)?;
                let instruction = binary_instruction(*op, operand)
                    .ok_or_else(|| format!("operator `{op}` has no {} form", val_name(operand)))?;
                self.emit(instruction);
            }
            IrExprKind::Load { array, index } => {
                self.element_address(array, index, element_size(&expr.ty))?;
                match value_type(&expr.ty)? {
                    ValType::F64 => self.emit(Instruction::F64Load(mem_arg(ARRAY_HEADER, 8))),
                    _ => self.emit(Instruction::I32Load(mem_arg(ARRAY_HEADER, 4))),
                }
            }
            IrExprKind::Call { callee, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                self.call(callee)?;
            }
            IrExprKind::ArrayNew(items) => self.allocate(expr, items)?,
        }
        Ok(())
    }

    /// Leaves `array + header + index * size` minus the header on the
    /// stack; loads and stores add the header as their static offset.
    fn element_address(&mut self, array: &IrExpr, index: &IrExpr, size: u64) -> Result<(), String> {
        self.expr(array)?;
        self.expr(index)?;
        self.emit(Instruction::I32Const(size as i32));
        self.emit(Instruction::I32Mul);
        self.emit(Instruction::I32Add);
        Ok(())
    }

    fn store(&mut self, ty: &Type, offset: u64) -> Result<(), String> {
        match value_type(ty)? {
            ValType::F64 => self.emit(Instruction::F64Store(mem_arg(offset, 8))),
            _ => self.emit(Instruction::I32Store(mem_arg(offset, 4))),
        }
        Ok(())
    }

    fn allocate(&mut self, expr: &IrExpr, items: &[IrExpr]) -> Result<(), String> {
        let element = expr.ty.element().cloned().unwrap_or(Type::Int);
        let size = element_size(&element);
        let bytes = ARRAY_HEADER + size * items.len() as u64;
        let reserved = bytes.div_ceil(8) * 8;

        let slot = self.next_scratch;
        self.next_scratch += 1;

        self.emit(Instruction::GlobalGet(HEAP_POINTER));
        self.emit(Instruction::LocalSet(slot));
        self.emit(Instruction::GlobalGet(HEAP_POINTER));
        self.emit(Instruction::I32Const(reserved as i32));
        self.emit(Instruction::I32Add);
        self.emit(Instruction::GlobalSet(HEAP_POINTER));

        self.emit(Instruction::LocalGet(slot));
        self.emit(Instruction::I32Const(items.len() as i32));
        self.emit(Instruction::I32Store(mem_arg(0, 4)));
        for (position, item) in items.iter().enumerate() {
            self.emit(Instruction::LocalGet(slot));
            self.expr(item)?;
            self.store(&element, ARRAY_HEADER + size * position as u64)?;
        }
        self.emit(Instruction::LocalGet(slot));
        Ok(())
    }
}

fn binary_instruction(op: BinaryOp, operand: ValType) -> Option<Instruction<'static>> {
    let instruction = match (operand, op) {
        (ValType::F64, BinaryOp::Add) => Instruction::F64Add,
        (ValType::F64, BinaryOp::Sub) => Instruction::F64Sub,
        (ValType::F64, BinaryOp::Mul) => Instruction::F64Mul,
        (ValType::F64, BinaryOp::Div) => Instruction::F64Div,
        (ValType::F64, BinaryOp::Eq) => Instruction::F64Eq,
        (ValType::F64, BinaryOp::Ne) => Instruction::F64Ne,
        (ValType::F64, BinaryOp::Lt) => Instruction::F64Lt,
        (ValType::F64, BinaryOp::Le) => Instruction::F64Le,
        (ValType::F64, BinaryOp::Gt) => Instruction::F64Gt,
        (ValType::F64, BinaryOp::Ge) => Instruction::F64Ge,
        (ValType::F64, _) => return None,
        (_, BinaryOp::Add) => Instruction::I32Add,
        (_, BinaryOp::Sub) => Instruction::I32Sub,
        (_, BinaryOp::Mul) => Instruction::I32Mul,
        (_, BinaryOp::Div) => Instruction::I32DivS,
        (_, BinaryOp::Rem) => Instruction::I32RemS,
        (_, BinaryOp::Eq) => Instruction::I32Eq,
        (_, BinaryOp::Ne) => Instruction::I32Ne,
        (_, BinaryOp::Lt) => Instruction::I32LtS,
        (_, BinaryOp::Le) => Instruction::I32LeS,
        (_, BinaryOp::Gt) => Instruction::I32GtS,
        (_, BinaryOp::Ge) => Instruction::I32GeS,
        (_, BinaryOp::BitAnd) => Instruction::I32And,
        (_, BinaryOp::BitOr) => Instruction::I32Or,
        (_, BinaryOp::BitXor) => Instruction::I32Xor,
        (_, BinaryOp::Shl) => Instruction::I32Shl,
        (_, BinaryOp::Shr) => Instruction::I32ShrS,
        (_, BinaryOp::And | BinaryOp::Or) => return None,
    };
    Some(instruction)
}

fn block_text(name: &str, ty: &BlockType) -> String {
    match ty {
        BlockType::Result(result) => format!("{name} (result {})", val_name(*result)),
        _ => name.to_string(),
    }
}

/// Text form of the instructions this backend produces.
fn wat_text(instruction: &Instruction<'_>) -> String {
    let text = match instruction {
        Instruction::I32Const(value) => return format!("i32.const {value}"),
        Instruction::LocalGet(index) => return format!("local.get {index}"),
        Instruction::LocalSet(index) => return format!("local.set {index}"),
        Instruction::GlobalGet(index) => return format!("global.get {index}"),
        Instruction::GlobalSet(index) => return format!("global.set {index}"),
        Instruction::I32Load(arg) => return format!("i32.load offset={}", arg.offset),
        Instruction::F64Load(arg) => return format!("f64.load offset={}", arg.offset),
        Instruction::I32Store(arg) => return format!("i32.store offset={}", arg.offset),
        Instruction::F64Store(arg) => return format!("f64.store offset={}", arg.offset),
        Instruction::Call(index) => return format!("call {index}"),
        Instruction::Br(depth) => return format!("br {depth}"),
        Instruction::BrIf(depth) => return format!("br_if {depth}"),
        Instruction::Block(ty) => return block_text("block", ty),
        Instruction::Loop(ty) => return block_text("loop", ty),
        Instruction::If(ty) => return block_text("if", ty),
        Instruction::Else => "else",
        Instruction::End => "end",
        Instruction::Return => "return",
        Instruction::Unreachable => "unreachable",
        Instruction::Drop => "drop",
        Instruction::I32Eqz => "i32.eqz",
        Instruction::I32Add => "i32.add",
        Instruction::I32Sub => "i32.sub",
        Instruction::I32Mul => "i32.mul",
        Instruction::I32DivS => "i32.div_s",
        Instruction::I32RemS => "i32.rem_s",
        Instruction::I32Eq => "i32.eq",
        Instruction::I32Ne => "i32.ne",
        Instruction::I32LtS => "i32.lt_s",
        Instruction::I32LeS => "i32.le_s",
        Instruction::I32GtS => "i32.gt_s",
        Instruction::I32GeS => "i32.ge_s",
        Instruction::I32And => "i32.and",
        Instruction::I32Or => "i32.or",
        Instruction::I32Xor => "i32.xor",
        Instruction::I32Shl => "i32.shl",
        Instruction::I32ShrS => "i32.shr_s",
        Instruction::F64Add => "f64.add",
        Instruction::F64Sub => "f64.sub",
        Instruction::F64Mul => "f64.mul",
        Instruction::F64Div => "f64.div",
        Instruction::F64Neg => "f64.neg",
        Instruction::F64Eq => "f64.eq",
        Instruction::F64Ne => "f64.ne",
        Instruction::F64Lt => "f64.lt",
        Instruction::F64Le => "f64.le",
        Instruction::F64Gt => "f64.gt",
        Instruction::F64Ge => "f64.ge",
        other => return format!("{other:?}"),
    };
    text.to_string()
}

/// Build the module from every function's emitted body.
///
/// Fails if any function has no body, so a module is only produced
/// when every function was emitted.
pub fn assemble(program: &IrProgram, emitted: &[EmittedFunction]) -> Result<Vec<u8>, CoreError> {
    let mut bodies = Vec::with_capacity(program.functions.len());
    for (index, name) in program.functions.keys().enumerate() {
        let body = emitted
            .iter()
            .find(|function| function.index == index)
            .and_then(|function| function.body.as_deref())
            .ok_or_else(|| CoreError::MissingBody {
                function: name.clone(),
            })?;
        bodies.push(body);
    }

    let mut module = Module::new();

    let mut types = TypeSection::new();
    let mut functions = FunctionSection::new();
    for (index, function) in program.functions.values().enumerate() {
        let signature = signature(function).map_err(CoreError::Assembly)?;
        types
            .ty()
            .function(signature.params, signature.result.into_iter());
        functions.function(index as u32);
    }
    module.section(&types);
    module.section(&functions);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: MEMORY_PAGES,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);

    let mut globals = GlobalSection::new();
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(HEAP_BASE),
    );
    for global in &program.globals {
        let val_type = value_type(&global.ty)
            .map_err(|reason| CoreError::Assembly(format!("global `{}`: {reason}", global.name)))?;
        let init = match val_type {
            ValType::F64 => ConstExpr::f64_const(0.0f64.into()),
            _ => ConstExpr::i32_const(0),
        };
        globals.global(
            GlobalType {
                val_type,
                mutable: true,
                shared: false,
            },
            &init,
        );
    }
    module.section(&globals);

    let mut exports = ExportSection::new();
    exports.export("memory", ExportKind::Memory, 0);
    for (index, function) in program.functions.values().enumerate() {
        if !function.is_init() {
            exports.export(&function.name, ExportKind::Func, index as u32);
        }
    }
    module.section(&exports);

    if let Some(index) = program.functions.get_index_of(INIT_FUNCTION) {
        module.section(&StartSection {
            function_index: index as u32,
        });
    }

    let mut code = CodeSection::new();
    for body in bodies {
        code.raw(body);
    }
    module.section(&code);

    Ok(module.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower;
    use crate::parser::parse_source;
    use crate::typecheck::analyze;

    fn lowered(source: &str) -> IrProgram {
        let program = parse_source(source).program.expect("parse");
        assert!(analyze(&program).is_clean());
        lower(&program).expect("lower")
    }

    fn emit_all(program: &IrProgram, sink: &Diagnostics) -> Vec<EmittedFunction> {
        program
            .functions
            .values()
            .enumerate()
            .map(|(index, function)| emit_function(program, index, function, sink))
            .collect()
    }

    fn build(source: &str) -> Vec<u8> {
        let program = lowered(source);
        let sink = Diagnostics::new();
        let emitted = emit_all(&program, &sink);
        assert!(sink.is_empty(), "{:?}", sink.snapshot());
        let wasm = assemble(&program, &emitted).expect("assemble");
        wasmparser::Validator::new()
            .validate_all(&wasm)
            .expect("valid module");
        wasm
    }

    fn run_main(wasm: &[u8]) -> i32 {
        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("typed func");
        main.call(&mut store, ()).expect("execute main")
    }

    #[test]
    fn executes_arithmetic_and_calls() {
        let wasm = build("add(a, b) { return a + b; } main() { return add(4, 10 - 3); }");
        assert_eq!(run_main(&wasm), 11);
    }

    #[test]
    fn executes_loops_and_branches() {
        let source = "main() {
            i = 0; total = 0;
            while (i < 10) {
                if (i % 2 == 0) { total = total + i; } else { total = total - 1; }
                i = i + 1;
            }
            return total;
        }";
        assert_eq!(run_main(&build(source)), 15);
    }

    #[test]
    fn loop_control_targets_the_innermost_loop() {
        let stepped = "main() {
            total = 0;
            for (int i = 0; i < 10; i = i + 1) {
                if (i == 7) { break; }
                if (i % 2 == 1) { continue; }
                total = total + i;
            }
            return total;
        }";
        assert_eq!(run_main(&build(stepped)), 12);

        let plain = "main() {
            n = 0; k = 0;
            while (n < 5) {
                n = n + 1;
                if (n == 3) { continue; }
                k = k + n;
            }
            return k;
        }";
        assert_eq!(run_main(&build(plain)), 12);

        let nested = "main() {
            count = 0;
            for (int i = 0; i < 3; i = i + 1) {
                j = 0;
                while (true) {
                    if (j == i) { break; }
                    j = j + 1;
                    count = count + 1;
                }
            }
            return count;
        }";
        assert_eq!(run_main(&build(nested)), 3);
    }

    #[test]
    fn branch_depths_count_enclosing_frames() {
        let source = "main() { for (i = 0; i < 9; i = i + 1) { \
                      if (i == 1) { continue; } break; } return 0; }";
        let program = lowered(source);
        let sink = Diagnostics::new();
        let listing = &emit_all(&program, &sink)[0].listing;
        // block, loop, body block, if
        assert!(listing.contains("          br 1\n"), "{listing}");
        // block, loop, body block
        assert!(listing.contains("        br 2\n"), "{listing}");
        assert!(listing.contains("      br 0\n"), "{listing}");
    }

    #[test]
    fn stray_loop_control_fails_emission() {
        let mut program = lowered("main() { return 0; }");
        if let Some(main) = program.functions.get_mut("main") {
            main.ops.insert(0, Op::Continue);
        }
        let sink = Diagnostics::new();
        let emitted = emit_all(&program, &sink);
        assert!(emitted[0].body.is_none());
        let diagnostics = sink.drain();
        assert!(diagnostics[0].message.contains("`continue` outside of a loop"));
    }

    #[test]
    fn short_circuits_logical_operators() {
        let source = "int calls = 0;
            bool touch() { calls = calls + 1; return true; }
            main() {
                if (false && touch()) { return 100; }
                if (true || touch()) { return calls; }
                return 200;
            }";
        assert_eq!(run_main(&build(source)), 0);
    }

    #[test]
    fn globals_are_initialized_by_the_start_function() {
        let wasm = build("int base = 40; int extra = base + 2; main() { return extra; }");
        assert_eq!(run_main(&wasm), 42);
    }

    #[test]
    fn arrays_round_trip_through_memory() {
        let source = "main() {
            int[] xs = [5, 6, 7];
            xs[1] = xs[0] + xs[2];
            float[] fs = [1.5, 2.5];
            if (fs[0] + fs[1] == 4.0) { return xs[1]; }
            return 0;
        }";
        assert_eq!(run_main(&build(source)), 12);
    }

    #[test]
    fn listing_reads_like_text_format() {
        let program = lowered("main() { x = 1; while (x < 5) { x = x * 2; } return x; }");
        let sink = Diagnostics::new();
        let emitted = emit_all(&program, &sink);
        let listing = &emitted[0].listing;
        assert!(listing.starts_with("(func $main (export \"main\") (result i32)\n"));
        assert!(listing.contains("  (local $x i32)\n"));
        assert!(listing.contains("  block\n    loop\n"));
        assert!(listing.contains("      br_if 1\n"));
        assert!(listing.ends_with("  unreachable\n)\n"));
    }

    #[test]
    fn string_values_fail_only_their_own_function() {
        let program = lowered("greet() { s = \"hi\"; return 1; } main() { return 2; }");
        let sink = Diagnostics::new();
        let emitted = emit_all(&program, &sink);
        assert!(emitted[0].body.is_none());
        assert!(emitted[1].body.is_some());

        let diagnostics = sink.drain();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::EmissionError);
        assert!(diagnostics[0].message.contains("`greet`"));

        let err = assemble(&program, &emitted).unwrap_err();
        assert!(matches!(err, CoreError::MissingBody { ref function } if function == "greet"));
    }
}
