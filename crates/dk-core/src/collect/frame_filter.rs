//! Noise-frame removal for captured call stacks.
//!
//! Runtime transition and marshaling frames carry no information about what
//! a thread is doing. A frame is dropped when its full text equals an
//! exact-exclusion entry, or when it contains a substring-exclusion entry.
//! Survivors keep their relative order.

/// Internal transition frames, matched on the full frame text.
pub const EXCLUDED_FRAMES: &[&str] = &[
    "[HelperMethodFrame]",
    "[HelperMethodFrame_1OBJ]",
    "[HelperMethodFrame_2OBJ]",
    "[HelperMethodFrame_PROTECTOBJ]",
    "[GCFrame]",
    "[InlinedCallFrame]",
    "[PrestubMethodFrame]",
    "[StubDispatchFrame]",
    "[ExternalMethodFrame]",
    "[ContextTransitionFrame]",
    "[DebuggerU2MCatchHandlerFrame]",
    "[FuncEvalFrame]",
    "[ComMethodFrame]",
    "[ComPlusMethodFrame]",
    "[PInvokeCalliFrame]",
    "[NDirectMethodFrameGeneric]",
    "[UMThkCallFrame]",
    "[FaultingExceptionFrame]",
    "[HijackFrame]",
    "[ResumableFrame]",
    "[RedirectedThreadFrame]",
];

/// Native interop stub symbols, matched anywhere in the frame text.
pub const EXCLUDED_SUBSTRINGS: &[&str] = &[
    "DomainBoundILStubClass.IL_STUB_PInvoke",
    "IL_STUB_PInvoke",
    "IL_STUB_ReversePInvoke",
    "IL_STUB_COMtoCLR",
    "IL_STUB_CLRtoCOM",
    "IL_STUB_StructMarshal",
];

/// Exact and substring frame exclusions.
#[derive(Debug, Clone)]
pub struct StackFrameFilter {
    exact: Vec<String>,
    substrings: Vec<String>,
}

impl Default for StackFrameFilter {
    fn default() -> Self {
        Self {
            exact: EXCLUDED_FRAMES.iter().map(|s| s.to_string()).collect(),
            substrings: EXCLUDED_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StackFrameFilter {
    /// Built-in lists plus caller-supplied additions.
    ///
    /// Empty entries are ignored; an empty substring would match every frame.
    pub fn with_additions(exact: &[String], substrings: &[String]) -> Self {
        let mut filter = Self::default();
        filter
            .exact
            .extend(exact.iter().filter(|s| !s.is_empty()).cloned());
        filter
            .substrings
            .extend(substrings.iter().filter(|s| !s.is_empty()).cloned());
        filter
    }

    /// A filter with no exclusions at all.
    pub fn empty() -> Self {
        Self {
            exact: Vec::new(),
            substrings: Vec::new(),
        }
    }

    pub fn is_excluded(&self, frame: &str) -> bool {
        self.exact.iter().any(|e| e == frame)
            || self.substrings.iter().any(|s| frame.contains(s.as_str()))
    }

    /// Filtered copy of `frames`.
    pub fn apply<S: AsRef<str>>(&self, frames: &[S]) -> Vec<String> {
        frames
            .iter()
            .map(|frame| frame.as_ref())
            .filter(|frame| !self.is_excluded(frame))
            .map(str::to_string)
            .collect()
    }
}
