//! Typed argument decoding for native operations called from scripts.
//!
//! Operations validate the argument count and every argument's type up front. Anything that does
//! not fit turns into [`Outcome::Ignored`], the call is then a no-op for the script.

use mlua::{Lua, MultiValue, Value};

/// One script argument, detached from the Lua stack.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeArg {
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    /// Flat key/value pairs, nested tables show up as `Other`.
    Table(Vec<(BridgeArg, BridgeArg)>),
    Other,
}

impl BridgeArg {
    pub fn from_lua(value: &Value) -> Self {
        Self::convert(value, true)
    }

    fn convert(value: &Value, descend: bool) -> Self {
        match value {
            Value::Nil => BridgeArg::Nil,
            Value::Boolean(b) => BridgeArg::Bool(*b),
            Value::Integer(i) => BridgeArg::Int(*i as i64),
            Value::Number(n) => BridgeArg::Number(*n),
            Value::String(s) => BridgeArg::Str(String::from(s.to_string_lossy())),
            Value::Table(t) if descend => BridgeArg::Table(
                t.pairs::<Value, Value>()
                    .filter_map(Result::ok)
                    .map(|(k, v)| (Self::convert(&k, false), Self::convert(&v, false)))
                    .collect(),
            ),
            _ => BridgeArg::Other,
        }
    }

    /// Numbers and numeric strings, like `lua_isnumber`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            BridgeArg::Int(i) => Some(*i as f64),
            BridgeArg::Number(n) => Some(*n),
            BridgeArg::Str(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Numbers truncate towards zero.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BridgeArg::Int(i) => Some(*i),
            _ => {
                let n = self.as_number()?;
                (n.is_finite() && n.abs() < i64::MAX as f64).then_some(n.trunc() as i64)
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BridgeArg::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Strings, numbers convert like `lua_tostring`.
    pub fn as_string(&self) -> Option<String> {
        match self {
            BridgeArg::Str(s) => Some(s.clone()),
            BridgeArg::Int(i) => Some(i.to_string()),
            BridgeArg::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub trait FromArg: Sized {
    fn from_arg(arg: &BridgeArg) -> Option<Self>;
}

impl FromArg for f64 {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_number()
    }
}

impl FromArg for f32 {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_number().map(|n| n as f32)
    }
}

impl FromArg for i64 {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_integer()
    }
}

impl FromArg for i32 {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_integer().and_then(|i| i32::try_from(i).ok())
    }
}

impl FromArg for u32 {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_integer().and_then(|i| u32::try_from(i).ok())
    }
}

impl FromArg for usize {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_integer().and_then(|i| usize::try_from(i).ok())
    }
}

impl FromArg for bool {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_bool()
    }
}

impl FromArg for String {
    fn from_arg(arg: &BridgeArg) -> Option<Self> {
        arg.as_string()
    }
}

/// Fixed-arity argument tuple.
pub trait FromArgs: Sized {
    const ARITY: usize;
    fn from_args(args: &[BridgeArg]) -> Option<Self>;
}

impl FromArgs for () {
    const ARITY: usize = 0;
    fn from_args(_args: &[BridgeArg]) -> Option<Self> {
        Some(())
    }
}

macro_rules! impl_from_args {
    ($arity:expr; $($ty:ident $idx:tt),+) => {
        impl<$($ty: FromArg),+> FromArgs for ($($ty,)+) {
            const ARITY: usize = $arity;
            fn from_args(args: &[BridgeArg]) -> Option<Self> {
                Some(($($ty::from_arg(args.get($idx)?)?,)+))
            }
        }
    };
}

impl_from_args!(1; A 0);
impl_from_args!(2; A 0, B 1);
impl_from_args!(3; A 0, B 1, C 2);
impl_from_args!(4; A 0, B 1, C 2, D 3);
impl_from_args!(5; A 0, B 1, C 2, D 3, E 4);
impl_from_args!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_from_args!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_from_args!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
impl_from_args!(9; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
impl_from_args!(10; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BridgeArgs(Vec<BridgeArg>);

impl BridgeArgs {
    pub fn new(args: Vec<BridgeArg>) -> Self {
        Self(args)
    }

    pub fn from_values(values: &MultiValue) -> Self {
        Self(values.iter().map(BridgeArg::from_lua).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BridgeArg> {
        self.0.get(index)
    }

    /// Decodes the whole argument list, `None` unless the count matches exactly.
    pub fn exact<T: FromArgs>(&self) -> Option<T> {
        if self.0.len() != T::ARITY {
            return None;
        }
        T::from_args(&self.0)
    }

    /// Decodes the first `T::ARITY` arguments, leaving the rest for the caller.
    pub fn prefix<T: FromArgs>(&self) -> Option<T> {
        T::from_args(self.0.get(..T::ARITY)?)
    }

    /// All arguments from `start` on as numbers.
    pub fn numbers_from(&self, start: usize) -> Option<Vec<f64>> {
        self.0.get(start..)?.iter().map(BridgeArg::as_number).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Nothing,
    Bool(bool),
    Int(i64),
    Numbers(Vec<f64>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Done(Reply),
    Ignored,
}

impl Outcome {
    pub fn done() -> Self {
        Outcome::Done(Reply::Nothing)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored)
    }

    pub fn into_values(self, lua: &Lua) -> mlua::Result<MultiValue> {
        let value = match self {
            Outcome::Ignored | Outcome::Done(Reply::Nothing) => return Ok(MultiValue::new()),
            Outcome::Done(Reply::Bool(b)) => Value::Boolean(b),
            Outcome::Done(Reply::Int(i)) => Value::Integer(i as mlua::Integer),
            Outcome::Done(Reply::Numbers(numbers)) => {
                Value::Table(lua.create_sequence_from(numbers)?)
            }
        };
        Ok(MultiValue::from_vec(vec![value]))
    }
}

impl<T> From<Option<T>> for Outcome
where
    T: Into<Outcome>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Outcome::Ignored)
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::done()
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Outcome::Done(reply)
    }
}
