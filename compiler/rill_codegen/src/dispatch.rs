//! Call-site dispatch resolution.
//!
//! Every method call is resolved to the cheapest strategy that is still
//! correct for every receiver the site can see:
//!
//! 1. **Static** when the receiver's class is known and no subclass
//!    overrides the method (or the class is known exactly).
//! 2. **Virtual** through the receiver's vtable when subclasses override it.
//! 3. **Builtin** for methods of builtin values in the builtin table.
//! 4. **Dynamic** named dispatch otherwise, recorded as a finding.

use rill_diagnostic::Location;
use rill_ir::{Name, Ty};

use crate::builtins::{self, BuiltinMethod};
use crate::classes::FieldInfo;
use crate::context::{CodegenCx, Findings};
use crate::descriptor::MethodDescriptor;
use crate::repr::Repr;

/// How one call site reaches its method.
#[derive(Clone, Debug)]
pub enum Dispatch<'a> {
    Static {
        descriptor: &'a MethodDescriptor,
    },
    Virtual {
        /// Descriptor of the definition visible at the static class.
        descriptor: &'a MethodDescriptor,
        /// Table word of the method's slot.
        word: u32,
    },
    Builtin(&'static BuiltinMethod),
    /// Reader of a field of a registered class.
    Getter(&'a FieldInfo),
    /// Writer (`name=`) of a field of a registered class.
    Setter(&'a FieldInfo),
    Dynamic {
        /// Best static guess of the receiver class, for reports.
        class: String,
    },
}

/// What a call site knows about its receiver.
#[derive(Copy, Clone, Debug)]
pub struct Receiver<'t> {
    pub repr: Repr,
    pub ty: &'t Ty,
    /// The receiver's class is exactly `repr`'s class (a fresh instance).
    pub exact: bool,
}

/// Resolve `receiver.method` called with `argc` positional arguments.
pub fn resolve_method<'a>(
    cx: &'a CodegenCx<'_>,
    receiver: Receiver<'_>,
    method: Name,
    argc: usize,
) -> Dispatch<'a> {
    let method_text = cx.name(method);
    match receiver.repr {
        Repr::Struct(class) => resolve_on_class(cx, class, receiver.exact, method, argc),
        repr => {
            let Some(class) = builtin_class(repr, receiver.ty) else {
                return Dispatch::Dynamic {
                    class: receiver.ty.display(cx.interner),
                };
            };
            match builtins::lookup(class, method_text) {
                Some(b) if b.arity == argc => Dispatch::Builtin(b),
                _ => Dispatch::Dynamic {
                    class: class.to_owned(),
                },
            }
        }
    }
}

fn resolve_on_class<'a>(
    cx: &'a CodegenCx<'_>,
    class: Name,
    exact: bool,
    method: Name,
    argc: usize,
) -> Dispatch<'a> {
    let dynamic = || Dispatch::Dynamic {
        class: cx.name(class).to_owned(),
    };
    let Some(owner) = cx.classes.find_method(class, method) else {
        let text = cx.name(method);
        if let Some(b) = builtins::object_method(text).filter(|b| b.arity == argc) {
            return Dispatch::Builtin(b);
        }
        if argc == 0 {
            if let Some(field) = cx.classes.field(class, method) {
                return Dispatch::Getter(field);
            }
        }
        if argc == 1 {
            if let Some(field) = text
                .strip_suffix('=')
                .and_then(|f| cx.interner.get(f))
                .and_then(|f| cx.classes.field(class, f))
            {
                return Dispatch::Setter(field);
            }
        }
        return dynamic();
    };
    let Some(descriptor) = cx.descriptors.get(Some(owner), method) else {
        return dynamic();
    };
    if !descriptor.accepts(argc) {
        return dynamic();
    }
    if exact || !cx.classes.is_overridden_below(class, method) {
        return Dispatch::Static { descriptor };
    }
    let Some(table) = cx.vtables.get(class) else {
        return dynamic();
    };
    match (table.slot(method), table.word_of(method)) {
        (Some(slot), Some(word)) if !slot.poisoned => Dispatch::Virtual { descriptor, word },
        _ => dynamic(),
    }
}

/// Resolve a call of top-level routine `name`.
pub fn resolve_call<'a>(cx: &'a CodegenCx<'_>, name: Name, argc: usize) -> Dispatch<'a> {
    if let Some(descriptor) = cx.descriptors.get(None, name) {
        if descriptor.accepts(argc) {
            return Dispatch::Static { descriptor };
        }
    } else if let Some(b) = builtins::kernel(cx.name(name)).filter(|b| b.arity == argc) {
        return Dispatch::Builtin(b);
    }
    Dispatch::Dynamic {
        class: crate::classes::ROOT_CLASS.to_owned(),
    }
}

/// Runtime class of a builtin receiver.
fn builtin_class(repr: Repr, ty: &Ty) -> Option<&'static str> {
    match repr {
        Repr::Int => Some("Integer"),
        Repr::Float => Some("Float"),
        Repr::Bool => Some("Boolean"),
        Repr::Array(_) => Some("Array"),
        Repr::Hash(_) => Some("Hash"),
        Repr::Boxed => ty.builtin_class().filter(|c| *c != "NilClass"),
        Repr::Struct(_) => None,
    }
}

/// Record a dynamic dispatch fallback at `symbol`, line `line`.
pub fn note_dynamic(
    cx: &CodegenCx<'_>,
    findings: &mut Findings,
    class: &str,
    method: &str,
    symbol: &str,
    line: Option<u32>,
) {
    findings.dynamic(
        cx.options.dispatch_notes,
        class,
        method,
        Location::new(symbol, line),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CodegenOptions;
    use pretty_assertions::assert_eq;
    use rill_ir::{Body, ClassType, Function, Param, Program, StringInterner};

    fn method(owner: Name, name: Name, params: Vec<Param>) -> Function {
        Function::method(owner, name, params, Ty::Dynamic, Body::default())
    }

    struct Fixture {
        interner: StringInterner,
        program: Program,
        options: CodegenOptions,
    }

    fn fixture() -> Fixture {
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let (a, b, c, speak, name, x) = (n("A"), n("B"), n("C"), n("speak"), n("name"), n("x"));
        let program = Program::new(
            vec![
                method(a, speak, Vec::new()),
                method(a, name, Vec::new()),
                method(b, speak, Vec::new()),
                method(c, speak, Vec::new()),
            ],
            vec![
                ClassType::new(a, None)
                    .with_method(speak)
                    .with_method(name)
                    .with_field(x, Ty::Int),
                ClassType::new(b, Some(a)).with_method(speak),
                ClassType::new(c, Some(b)).with_method(speak),
            ],
        );
        Fixture {
            interner,
            program,
            options: CodegenOptions::default(),
        }
    }

    fn kind(d: &Dispatch<'_>) -> &'static str {
        match d {
            Dispatch::Static { .. } => "static",
            Dispatch::Virtual { .. } => "virtual",
            Dispatch::Builtin(_) => "builtin",
            Dispatch::Getter(_) => "getter",
            Dispatch::Setter(_) => "setter",
            Dispatch::Dynamic { .. } => "dynamic",
        }
    }

    #[test]
    fn overridden_methods_dispatch_through_the_vtable() {
        let f = fixture();
        let mut findings = Findings::new();
        let Ok(cx) = CodegenCx::new(&f.program, &f.interner, &f.options, &mut findings) else {
            panic!("context should build");
        };
        let n = |s: &str| f.interner.intern(s);
        let open = |class: &str, exact: bool| Receiver {
            repr: Repr::Struct(n(class)),
            ty: &Ty::Dynamic,
            exact,
        };

        let d = resolve_method(&cx, open("A", false), n("speak"), 0);
        let Dispatch::Virtual { word, descriptor } = &d else {
            panic!("expected a vtable call, got {}", kind(&d));
        };
        assert_eq!((*word, descriptor.symbol.as_str()), (1, "A#speak"));

        assert_eq!(kind(&resolve_method(&cx, open("A", true), n("speak"), 0)), "static");
        assert_eq!(kind(&resolve_method(&cx, open("C", false), n("speak"), 0)), "static");
        assert_eq!(kind(&resolve_method(&cx, open("B", false), n("name"), 0)), "static");
        assert_eq!(kind(&resolve_method(&cx, open("B", false), n("x"), 0)), "getter");
        assert_eq!(kind(&resolve_method(&cx, open("B", false), n("x="), 1)), "setter");
        assert_eq!(kind(&resolve_method(&cx, open("B", false), n("inspect"), 0)), "builtin");
        assert_eq!(kind(&resolve_method(&cx, open("B", false), n("speak"), 2)), "dynamic");
    }

    #[test]
    fn builtin_receivers_and_unknown_receivers() {
        let f = fixture();
        let mut findings = Findings::new();
        let Ok(cx) = CodegenCx::new(&f.program, &f.interner, &f.options, &mut findings) else {
            panic!("context should build");
        };
        let n = |s: &str| f.interner.intern(s);
        let int = Receiver {
            repr: Repr::Int,
            ty: &Ty::Int,
            exact: false,
        };
        let Dispatch::Builtin(b) = resolve_method(&cx, int, n("to_s"), 0) else {
            panic!("Integer#to_s is a builtin");
        };
        assert_eq!(b.entry, "rl_int_to_s");

        let string = Receiver {
            repr: Repr::Boxed,
            ty: &Ty::Str,
            exact: false,
        };
        assert_eq!(kind(&resolve_method(&cx, string, n("upcase"), 0)), "builtin");

        let unknown = Receiver {
            repr: Repr::Boxed,
            ty: &Ty::Dynamic,
            exact: false,
        };
        let Dispatch::Dynamic { class } = resolve_method(&cx, unknown, n("speak"), 0) else {
            panic!("untyped receivers dispatch by name");
        };
        assert_eq!(class, "untyped");

        assert_eq!(kind(&resolve_call(&cx, n("puts"), 1)), "builtin");
        assert_eq!(kind(&resolve_call(&cx, n("helper"), 0)), "dynamic");
    }
}
