use std::env;
use std::fs;
use std::io::{self, BufRead, Write};

use monkeycore::{
    bytecode::{read_program, write_program},
    compiler::Compiler,
    lexer::Lexer,
    object::{Object, BUILTINS},
    opcode::instructions_to_string,
    parser::Parser,
    symbol_table::SymbolTable,
    vm::{Vm, GLOBALS_SIZE},
};

const PROMPT: &str = ">> ";

const MONKEY_FACE: &str = r#"            __,__
   .--.  .-"     "-.  .--.
  / .. \/  .-. .-.  \/ .. \
 | |  '|  /   Y   \  |'  | |
 | \   \  \ 0 | 0 /  /   / |
  \ '- ,\.-"""""""-./, -' /
   ''-' /_   ^ ^   _\ '-''
       |  \._   _./  |
       \   \ '~' /   /
        '._ '-=-' _.'
           '-----'
"#;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "--version" | "-v" => {
            println!("monkeycore {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "repl" => {
            run_repl();
        }
        "--emit" => {
            if args.len() < 3 {
                eprintln!("Usage: monkeycore --emit <file.mk>");
                std::process::exit(1);
            }
            if let Err(e) = emit_bytecode(&args[2]) {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: monkeycore run <file.mk|file.mkbc>");
                std::process::exit(1);
            }
            let filename = &args[2];
            if filename.ends_with(".mkbc") {
                if let Err(e) = run_bytecode_file(filename) {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            } else if let Err(e) = run_source_file(filename) {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        _ => {
            if args[1].starts_with('-') {
                eprintln!("Unknown option: {}", args[1]);
                print_usage();
                std::process::exit(1);
            }
            if let Err(e) = run_source_file(&args[1]) {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  monkeycore <file.mk>");
    eprintln!("  monkeycore run <file.mk|file.mkbc>");
    eprintln!("  monkeycore --emit <file.mk>");
    eprintln!("  monkeycore repl");
    eprintln!("  monkeycore --version");
    eprintln!("  monkeycore help");
}

fn compile_source(src: &str) -> Result<monkeycore::compiler::Bytecode, String> {
    let lexer = Lexer::new(src);
    let mut parser = Parser::new(lexer);
    let program = parser.parse_program();
    if !parser.errors().is_empty() {
        return Err(format!("parser errors:\n{}", parser.errors().join("\n")));
    }

    let mut compiler = Compiler::new();
    compiler
        .compile(&program)
        .map_err(|e| format!("compile failed: {}", e))?;
    Ok(compiler.bytecode())
}

fn run_source_file(filename: &str) -> Result<(), String> {
    let src = fs::read_to_string(filename).map_err(|e| format!("Failed to read file: {}", e))?;
    let bytecode = compile_source(&src)?;
    let mut vm = Vm::new(bytecode);
    vm.run()
}

fn run_bytecode_file(filename: &str) -> Result<(), String> {
    let bytecode = read_program(filename).map_err(|e| format!("Failed to read bytecode: {}", e))?;
    let mut vm = Vm::new(bytecode);
    vm.run()
}

fn emit_bytecode(filename: &str) -> Result<(), String> {
    let src = fs::read_to_string(filename).map_err(|e| format!("Failed to read file: {}", e))?;
    let bytecode = compile_source(&src)?;
    let out = filename.replace(".mk", ".mkbc");
    write_program(&bytecode, &out).map_err(|e| format!("Failed to write bytecode: {}", e))?;
    println!("Generated {}", out);
    Ok(())
}

fn run_repl() {
    let mut constants: Vec<Object> = Vec::new();
    let mut globals: Vec<Object> = vec![Object::Null; GLOBALS_SIZE];
    let mut symbol_table = SymbolTable::new();
    for (i, builtin) in BUILTINS.iter().enumerate() {
        symbol_table.define_builtin(i, builtin.name);
    }

    let mut show_bc = false;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{}", PROMPT);
        io::stdout().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        match line.trim() {
            ":exit" | ":quit" => break,
            ":help" => {
                println!(":bc           toggle bytecode print");
                println!(":exit         exit repl");
                continue;
            }
            ":bc" => {
                show_bc = !show_bc;
                println!("Bytecode: {}", if show_bc { "on" } else { "off" });
                continue;
            }
            "" => continue,
            _ => {}
        }

        let lexer = Lexer::new(&line);
        let mut parser = Parser::new(lexer);
        let program = parser.parse_program();
        if !parser.errors().is_empty() {
            print_parser_errors(parser.errors());
            continue;
        }

        let mut compiler = Compiler::new_with_state(symbol_table, constants);
        if let Err(e) = compiler.compile(&program) {
            println!("Woops! Compilation failed:\n {}", e);
            let (table, consts) = compiler.into_state();
            symbol_table = table;
            constants = consts;
            continue;
        }

        let bytecode = compiler.bytecode();
        let (table, consts) = compiler.into_state();
        symbol_table = table;
        constants = consts;

        if show_bc {
            print!("{}", instructions_to_string(&bytecode.instructions));
        }

        let mut machine = Vm::new_with_globals(bytecode, globals);
        match machine.run() {
            Err(e) => println!("Woops! Executing bytecode failed:\n{}", e),
            Ok(()) => println!("{}", machine.last_popped_stack_elem()),
        }
        globals = machine.into_globals();
    }
}

fn print_parser_errors(errors: &[String]) {
    print!("{}", MONKEY_FACE);
    println!("Woops! We ran into some monkey business here");
    println!(" parser errors:");
    for msg in errors {
        println!("\t{}", msg);
    }
}
