pub mod rule_reader;

pub use rule_reader::{RuleReaderError, RuleReaderService};
