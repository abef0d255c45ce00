//! Boundary to generated code.
//!
//! Generated extractor and converter sources are never imported into this
//! process. They run inside an interpreter subprocess behind a small
//! JSON-lines protocol, and their class shape is checked against an
//! [`InterfaceContract`] before the first call.

pub mod contract;
pub mod loader;
pub mod session;

pub use contract::{
    CONVERTER_CONTRACT, ClassInfo, EXTRACTOR_CONTRACT, InterfaceContract, MethodInfo, ParamInfo,
    PluginDescription, PluginKind, contract_violations, verify_contract,
};
pub use loader::{
    Converter, ExtractedRecord, ExtractedValue, Extractor, PluginLoader, SubprocessLoader,
    decode_record,
};
pub use session::{HOST_SCRIPT, PluginSession, SyntaxCheck, check_syntax};
