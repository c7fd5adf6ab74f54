//! Host syscall registry.
//!
//! Interop packages expose bodyless wrapper functions; a call to one
//! becomes a single SYSCALL instruction with the interop API id. Entries
//! flagged `convert_result_to_struct` return composite host objects that
//! the program addresses field-wise.

pub(crate) struct Syscall {
    pub api: &'static str,
    pub convert_result_to_struct: bool,
}

/// Look up a wrapper by interop package name and function name.
pub(crate) fn lookup(api: &str, name: &str) -> Option<Syscall> {
    let (interop, convert) = match (api, name) {
        ("runtime", "Log") => ("System.Runtime.Log", false),
        ("runtime", "Notify") => ("System.Runtime.Notify", false),
        ("runtime", "CheckWitness") => ("System.Runtime.CheckWitness", false),
        ("runtime", "GetTime") => ("System.Runtime.GetTime", false),
        ("runtime", "GetTrigger") => ("System.Runtime.GetTrigger", false),
        ("runtime", "GasLeft") => ("System.Runtime.GasLeft", false),
        ("storage", "GetContext") => ("System.Storage.GetContext", false),
        ("storage", "GetReadOnlyContext") => ("System.Storage.GetReadOnlyContext", false),
        ("storage", "Get") => ("System.Storage.Get", false),
        ("storage", "Put") => ("System.Storage.Put", false),
        ("storage", "Delete") => ("System.Storage.Delete", false),
        ("storage", "Find") => ("System.Storage.Find", false),
        ("iterator", "Next") => ("System.Iterator.Next", false),
        ("iterator", "Value") => ("System.Iterator.Value", false),
        ("contract", "Call") => ("System.Contract.Call", false),
        ("contract", "GetCallFlags") => ("System.Contract.GetCallFlags", false),
        ("crypto", "CheckSig") => ("System.Crypto.CheckSig", false),
        ("ledger", "GetBlock") => ("System.Blockchain.GetBlock", true),
        ("ledger", "GetTransaction") => ("System.Blockchain.GetTransaction", true),
        ("ledger", "GetTransactionHeight") => ("System.Blockchain.GetTransactionHeight", false),
        _ => return None,
    };
    Some(Syscall { api: interop, convert_result_to_struct: convert })
}
