/// A single request: an ordered sequence of opaque byte-string arguments.
///
/// Arguments are added with [`arg`](Command::arg); primitive values are
/// stringified on the way in. A command carries no identity after it was
/// sent — replies are matched to requests purely by order.
///
/// ```
/// use redline_impl::Command;
/// let cmd = Command::new("SET").arg("key1").arg(42);
/// assert_eq!(cmd.to_command_string(), "SET key1 42");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with the given name.
    pub fn new<A: ToArg>(name: A) -> Self {
        Self {
            args: vec![name.to_arg()],
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg<A: ToArg>(mut self, a: A) -> Self {
        self.args.push(a.to_arg());
        self
    }

    /// Appends every element of the iterator as one argument.
    #[must_use]
    pub fn args<A: ToArg, I: IntoIterator<Item = A>>(mut self, args: I) -> Self {
        for a in args {
            self.args.push(a.to_arg());
        }
        self
    }

    /// Appends each pair as two consecutive arguments (field, value).
    #[must_use]
    pub fn arg_pairs<K: ToArg, V: ToArg, I: IntoIterator<Item = (K, V)>>(
        mut self,
        pairs: I,
    ) -> Self {
        for (k, v) in pairs {
            self.args.push(k.to_arg());
            self.args.push(v.to_arg());
        }
        self
    }

    /// Parses a command from its space separated string form, e.g.
    /// `SET key 123`. Double quotes protect embedded spaces; a doubled
    /// backslash or `\"` inside quotes escapes the respective character.
    pub fn parse(line: &str) -> Self {
        let mut args: Vec<Vec<u8>> = Vec::new();
        let mut current = Vec::new();
        let mut in_quotes = false;
        let mut escaped = false;
        let mut started = false;
        for b in line.bytes() {
            if escaped {
                current.push(b);
                escaped = false;
            } else if in_quotes && b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_quotes = !in_quotes;
                started = true;
            } else if !in_quotes && (b == b' ' || b == b'\t') {
                if started || !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                    started = false;
                }
            } else {
                current.push(b);
            }
        }
        if started || !current.is_empty() {
            args.push(current);
        }
        Self { args }
    }

    /// The number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Appends the array-of-bulk-strings framing of this command to `out`.
    ///
    /// Argument bytes are emitted verbatim, never escaped.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(format!("*{}\r\n", self.args.len()).as_bytes());
        for a in &self.args {
            out.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
            out.extend_from_slice(a);
            out.extend_from_slice(b"\r\n");
        }
    }

    /// The space separated string form, for log lines.
    pub fn to_command_string(&self) -> String {
        let mut s = String::new();
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                s.push(' ');
            }
            let text = String::from_utf8_lossy(a);
            if text.contains(' ') {
                s.push('"');
                s.push_str(&text);
                s.push('"');
            } else {
                s.push_str(&text);
            }
        }
        s
    }
}

/// Conversion of primitive values into command arguments.
///
/// Numeric values are stringified with their decimal representation,
/// locale-free. Byte slices pass through verbatim.
pub trait ToArg {
    fn to_arg(self) -> Vec<u8>;
}

impl ToArg for Vec<u8> {
    fn to_arg(self) -> Vec<u8> {
        self
    }
}
impl ToArg for &[u8] {
    fn to_arg(self) -> Vec<u8> {
        self.to_vec()
    }
}
impl ToArg for String {
    fn to_arg(self) -> Vec<u8> {
        self.into_bytes()
    }
}
impl ToArg for &String {
    fn to_arg(self) -> Vec<u8> {
        self.clone().into_bytes()
    }
}
impl ToArg for &str {
    fn to_arg(self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

macro_rules! to_arg_via_display {
    ($($t:ty),*) => {
        $(impl ToArg for $t {
            fn to_arg(self) -> Vec<u8> {
                self.to_string().into_bytes()
            }
        })*
    };
}
to_arg_via_display!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);
