//! Bytecode disassembler (luac -l style output).

use std::fmt::Write;
use umbra_core::function::{Constant, Function};
use umbra_core::gc::{Gc, GcIdx};
use umbra_core::opcode::InstructionFormat;

/// Disassemble a prototype and its children into a human-readable string.
pub fn disassemble(gc: &Gc, func: GcIdx<Function>) -> String {
    let mut out = String::new();
    disassemble_function(&mut out, gc, func, 0);
    out
}

fn disassemble_function(out: &mut String, gc: &Gc, idx: GcIdx<Function>, level: usize) {
    let indent = "  ".repeat(level);
    let func = gc.function(idx);

    let module = func
        .module()
        .map(|m| String::from_utf8_lossy(gc.string(m).as_bytes()).into_owned())
        .unwrap_or_else(|| "?".to_string());
    writeln!(
        out,
        "{indent}function <{module}:{}> ({} params, {} constants, {} functions)",
        func.line(),
        func.param_count(),
        func.constants().len(),
        func.children().len(),
    )
    .unwrap();

    for (pc, inst) in func.code().iter().enumerate() {
        let line = func.line_of(pc);
        let line_str = if line > 0 {
            format!("[{line}]")
        } else {
            "[-]".to_string()
        };
        write!(out, "{indent}\t{}\t{:>5}\t{}", pc + 1, line_str, inst.opcode().name()).unwrap();
        match inst.opcode().format() {
            InstructionFormat::A => write!(out, " {}", inst.a()).unwrap(),
            InstructionFormat::AB => write!(out, " {} {}", inst.a(), inst.bx()).unwrap(),
            InstructionFormat::ABC => {
                write!(out, " {} {} {}", inst.a(), inst.b(), inst.c()).unwrap()
            }
            InstructionFormat::AsBx => write!(out, " {} {}", inst.a(), inst.sbx()).unwrap(),
        }
        writeln!(out).unwrap();
    }

    if !func.constants().is_empty() {
        writeln!(out, "{indent}constants ({}):", func.constants().len()).unwrap();
        for (i, k) in func.constants().iter().enumerate() {
            write!(out, "{indent}\t{i}\t").unwrap();
            match k {
                Constant::Number(n) => writeln!(out, "{n}").unwrap(),
                Constant::Str(s) => {
                    let bytes = gc.string(*s).as_bytes();
                    if let Ok(text) = std::str::from_utf8(bytes) {
                        writeln!(out, "\"{text}\"").unwrap();
                    } else {
                        writeln!(out, "<binary string>").unwrap();
                    }
                }
            }
        }
    }

    for (i, child) in func.children().iter().enumerate() {
        writeln!(out, "{indent}function [{i}]:").unwrap();
        disassemble_function(out, gc, *child, level + 1);
    }
}
