//! Per-dialect spellings.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::model::Primitive;

/// Output language.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Idl,
    Cpp,
    Generic,
}

/// Token tables for one `(dialect, hide_comments)` combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formatter {
    pub dialect: Dialect,
    pub hide_comments: bool,
    pub attr_open: &'static str,
    pub attr_close: &'static str,
    /// Namespace separator used when demangling WinRT names.
    pub separator: &'static str,
}

impl Formatter {
    pub fn new(dialect: Dialect, hide_comments: bool) -> Self {
        let (attr_open, attr_close, separator) = match dialect {
            Dialect::Idl => ("[", "]", "."),
            Dialect::Cpp => ("/* [", "] */", "::"),
            Dialect::Generic => ("[", "]", "."),
        };
        Self {
            dialect,
            hide_comments,
            attr_open,
            attr_close,
            separator,
        }
    }

    pub fn primitive(&self, primitive: Primitive) -> &'static str {
        use Primitive::*;
        let (idl, cpp, generic) = match primitive {
            Void => ("void", "void", "void"),
            I1 => ("char", "char", "sbyte"),
            UI1 => ("unsigned char", "unsigned char", "byte"),
            Byte => ("byte", "BYTE", "byte"),
            Char => ("char", "char", "char"),
            WChar => ("wchar_t", "wchar_t", "char"),
            I2 => ("short", "short", "short"),
            UI2 => ("unsigned short", "unsigned short", "ushort"),
            I4 => ("long", "long", "int"),
            UI4 => ("unsigned long", "unsigned long", "uint"),
            I8 => ("hyper", "__int64", "long"),
            UI8 => ("unsigned hyper", "unsigned __int64", "ulong"),
            Int => ("int", "int", "int"),
            UInt => ("unsigned int", "unsigned int", "uint"),
            R4 => ("float", "float", "float"),
            R8 => ("double", "double", "double"),
            Currency => ("CURRENCY", "CY", "Currency"),
            Date => ("DATE", "DATE", "DateTime"),
            Bstr => ("BSTR", "BSTR", "string"),
            Dispatch => ("IDispatch*", "IDispatch*", "IDispatch"),
            Scode => ("SCODE", "SCODE", "int"),
            Bool => ("VARIANT_BOOL", "VARIANT_BOOL", "bool"),
            Variant => ("VARIANT", "VARIANT", "object"),
            Unknown => ("IUnknown*", "IUnknown*", "IUnknown"),
            Decimal => ("DECIMAL", "DECIMAL", "decimal"),
            HResult => ("HRESULT", "HRESULT", "HRESULT"),
            LpStr => ("LPSTR", "char*", "string"),
            LpWStr => ("LPWSTR", "wchar_t*", "string"),
            IntPtr => ("INT_PTR", "INT_PTR", "IntPtr"),
            UIntPtr => ("UINT_PTR", "UINT_PTR", "UIntPtr"),
            ErrorStatus => ("error_status_t", "error_status_t", "uint"),
        };
        match self.dialect {
            Dialect::Idl => idl,
            Dialect::Cpp => cpp,
            Dialect::Generic => generic,
        }
    }

    /// Keyword introducing a vtable interface body.
    pub fn interface_keyword(&self) -> &'static str {
        match self.dialect {
            Dialect::Cpp => "struct",
            Dialect::Idl | Dialect::Generic => "interface",
        }
    }

    /// Closing line of a braced declaration.
    pub fn close_brace(&self) -> &'static str {
        match self.dialect {
            Dialect::Generic => "}",
            Dialect::Idl | Dialect::Cpp => "};",
        }
    }

    /// Attribute token as written; C++ attributes live inside a comment.
    pub fn attribute_token<'t>(&self, token: &'t str) -> Cow<'t, str> {
        match self.dialect {
            Dialect::Cpp => comment_safe(token),
            Dialect::Idl | Dialect::Generic => Cow::Borrowed(token),
        }
    }

    /// Parameter flag token: lower case except in the generic dialect.
    pub fn param_token(&self, lower: &'static str, generic: &'static str) -> &'static str {
        match self.dialect {
            Dialect::Generic => generic,
            Dialect::Idl | Dialect::Cpp => lower,
        }
    }
}

/// Escape text for a double-quoted string literal.
/// `text` with every `*/` broken up so it can sit inside a block comment.
pub fn comment_safe(text: &str) -> Cow<'_, str> {
    if text.contains("*/") {
        text.replace("*/", "* /").into()
    } else {
        text.into()
    }
}

pub fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{0b}' => out.push_str("\\v"),
            '\u{08}' => out.push_str("\\b"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}
