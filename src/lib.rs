pub mod keys;
pub mod bytecode;
pub mod preprocessor;
pub mod lexer;
pub mod parser;
pub mod codegen;
pub mod resolver;
pub mod compiler;
pub mod diagnostic;
pub mod artifact;
pub mod hardware;
pub mod sim;
pub mod rng;
pub mod config;
pub mod vm;
