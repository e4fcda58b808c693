//! Built-in runtime function signatures
//!
//! The fixed catalog of runtime functions the generated C links against.
//! Each entry feeds the type checker's symbol table; polymorphic runtime
//! entry points (print, formatOutput, min/max, ...) are registered once per
//! concrete type and resolved through the normal overload machinery.

use crate::ast::Ty;

/// Signature of one built-in overload.
#[derive(Debug, Clone)]
pub struct BuiltinFn {
    pub name: &'static str,
    pub params: Vec<Ty>,
    pub ret: Ty,
    /// Throw kinds the builtin may raise (throws-contract checking).
    pub throws: &'static [&'static str],
}

impl BuiltinFn {
    fn new(name: &'static str, params: Vec<Ty>, ret: Ty) -> Self {
        BuiltinFn {
            name,
            params,
            ret,
            throws: &[],
        }
    }

    fn throwing(
        name: &'static str,
        params: Vec<Ty>,
        ret: Ty,
        throws: &'static [&'static str],
    ) -> Self {
        BuiltinFn {
            name,
            params,
            ret,
            throws,
        }
    }
}

/// Free function paired with each recognized `owned` constructor.
///
/// `declare owned x = C(...)` resolves its cleanup function here at
/// declaration time.
pub fn constructor_free_fn(ctor: &str) -> Option<&'static str> {
    Some(match ctor {
        "array_new" => "array_free",
        "dict_new" => "dict_free",
        "map_new" => "map_free",
        "object_new" => "object_free",
        "option_new" => "option_free",
        "result_new" => "result_free",
        "np_array" => "np_free",
        "gfx_window" => "gfx_free",
        "game_window" => "game_free",
        "pg_surface" => "pg_surface_free",
        "phys_world" => "phys_free",
        "http_server" => "http_server_free",
        "http_client" => "http_client_free",
        _ => return None,
    })
}

const NUMERIC: [Ty; 4] = [Ty::I32, Ty::I64, Ty::F32, Ty::F64];
const PRINTABLE: [Ty; 6] = [Ty::I32, Ty::I64, Ty::F32, Ty::F64, Ty::Bool, Ty::Str];

/// Build the full builtin catalog.
pub fn catalog() -> Vec<BuiltinFn> {
    let mut fns = Vec::new();

    // Printing and formatting. One overload per printable type; the code
    // generator dispatches them through a _Generic macro.
    for ty in PRINTABLE {
        fns.push(BuiltinFn::new("print", vec![ty], Ty::Void));
        fns.push(BuiltinFn::new("println", vec![ty], Ty::Void));
        fns.push(BuiltinFn::new("formatOutput", vec![ty], Ty::Str));
    }
    // Monomorphic string printers, used directly by the optimizer's
    // constant-print rewrite.
    fns.push(BuiltinFn::new("print_str", vec![Ty::Str], Ty::Void));
    fns.push(BuiltinFn::new("println_str", vec![Ty::Str], Ty::Void));

    // Numeric helpers.
    for ty in NUMERIC {
        fns.push(BuiltinFn::new("max", vec![ty, ty], ty));
        fns.push(BuiltinFn::new("min", vec![ty, ty], ty));
        fns.push(BuiltinFn::new("abs", vec![ty], ty));
        fns.push(BuiltinFn::new("clamp", vec![ty, ty, ty], ty));
    }

    // Strings.
    fns.push(BuiltinFn::new("str_len", vec![Ty::Str], Ty::I64));
    fns.push(BuiltinFn::new("str_concat", vec![Ty::Str, Ty::Str], Ty::Str));
    fns.push(BuiltinFn::new(
        "str_sub",
        vec![Ty::Str, Ty::I64, Ty::I64],
        Ty::Str,
    ));
    fns.push(BuiltinFn::new("str_find", vec![Ty::Str, Ty::Str], Ty::I64));
    fns.push(BuiltinFn::new("to_upper", vec![Ty::Str], Ty::Str));
    fns.push(BuiltinFn::new("to_lower", vec![Ty::Str], Ty::Str));
    fns.push(BuiltinFn::new("parse_i64", vec![Ty::Str], Ty::I64));
    fns.push(BuiltinFn::new("parse_f64", vec![Ty::Str], Ty::F64));
    fns.push(BuiltinFn::new("bool_to_i64", vec![Ty::Bool], Ty::I64));
    fns.push(BuiltinFn::new("input", vec![], Ty::Str));

    // Dynamic string array.
    fns.push(BuiltinFn::new("array_new", vec![], Ty::I64));
    fns.push(BuiltinFn::new("array_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new("array_push", vec![Ty::I64, Ty::Str], Ty::Void));
    fns.push(BuiltinFn::new("array_get", vec![Ty::I64, Ty::I64], Ty::Str));
    fns.push(BuiltinFn::new(
        "array_set",
        vec![Ty::I64, Ty::I64, Ty::Str],
        Ty::Void,
    ));
    fns.push(BuiltinFn::new("array_len", vec![Ty::I64], Ty::I64));

    // String-keyed dictionary.
    fns.push(BuiltinFn::new("dict_new", vec![], Ty::I64));
    fns.push(BuiltinFn::new("dict_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "dict_set",
        vec![Ty::I64, Ty::Str, Ty::Str],
        Ty::Void,
    ));
    fns.push(BuiltinFn::new("dict_get", vec![Ty::I64, Ty::Str], Ty::Str));
    fns.push(BuiltinFn::new("dict_has", vec![Ty::I64, Ty::Str], Ty::Bool));
    fns.push(BuiltinFn::new("dict_len", vec![Ty::I64], Ty::I64));

    // Integer-keyed map.
    fns.push(BuiltinFn::new("map_new", vec![], Ty::I64));
    fns.push(BuiltinFn::new("map_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "map_set",
        vec![Ty::I64, Ty::I64, Ty::I64],
        Ty::Void,
    ));
    fns.push(BuiltinFn::new("map_get", vec![Ty::I64, Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("map_has", vec![Ty::I64, Ty::I64], Ty::Bool));
    fns.push(BuiltinFn::new("map_len", vec![Ty::I64], Ty::I64));

    // String-keyed object store backing class instances.
    fns.push(BuiltinFn::new("object_new", vec![Ty::Str], Ty::I64));
    fns.push(BuiltinFn::new("object_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "object_set",
        vec![Ty::I64, Ty::Str, Ty::Str],
        Ty::Void,
    ));
    fns.push(BuiltinFn::new("object_get", vec![Ty::I64, Ty::Str], Ty::Str));

    // Option / result handles.
    fns.push(BuiltinFn::new("option_new", vec![], Ty::I64));
    fns.push(BuiltinFn::new("option_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new("option_set", vec![Ty::I64, Ty::Str], Ty::Void));
    fns.push(BuiltinFn::new("option_is_some", vec![Ty::I64], Ty::Bool));
    fns.push(BuiltinFn::new("option_get", vec![Ty::I64], Ty::Str));
    fns.push(BuiltinFn::new("result_new", vec![], Ty::I64));
    fns.push(BuiltinFn::new("result_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new("result_ok", vec![Ty::I64, Ty::Str], Ty::Void));
    fns.push(BuiltinFn::new("result_err", vec![Ty::I64, Ty::Str], Ty::Void));
    fns.push(BuiltinFn::new("result_is_ok", vec![Ty::I64], Ty::Bool));
    fns.push(BuiltinFn::new("result_get", vec![Ty::I64], Ty::Str));

    // Numeric array (np).
    fns.push(BuiltinFn::new("np_array", vec![Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("np_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "np_set",
        vec![Ty::I64, Ty::I64, Ty::F64],
        Ty::Void,
    ));
    fns.push(BuiltinFn::new("np_get", vec![Ty::I64, Ty::I64], Ty::F64));
    fns.push(BuiltinFn::new("np_sum", vec![Ty::I64], Ty::F64));
    fns.push(BuiltinFn::new("np_dot", vec![Ty::I64, Ty::I64], Ty::F64));

    // Graphics window.
    fns.push(BuiltinFn::new("gfx_window", vec![Ty::I64, Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("gfx_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "gfx_draw_rect",
        vec![Ty::I64, Ty::I64, Ty::I64, Ty::I64, Ty::I64],
        Ty::Void,
    ));
    fns.push(BuiltinFn::new("gfx_present", vec![Ty::I64], Ty::Void));

    // Game window.
    fns.push(BuiltinFn::new("game_window", vec![Ty::I64, Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("game_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new("game_poll", vec![Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new(
        "game_key_down",
        vec![Ty::I64, Ty::I64],
        Ty::Bool,
    ));

    // Pixel surface.
    fns.push(BuiltinFn::new("pg_surface", vec![Ty::I64, Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("pg_surface_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "pg_blit",
        vec![Ty::I64, Ty::I64, Ty::I64, Ty::I64],
        Ty::Void,
    ));

    // Physics world.
    fns.push(BuiltinFn::new("phys_world", vec![], Ty::I64));
    fns.push(BuiltinFn::new("phys_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new(
        "phys_add_body",
        vec![Ty::I64, Ty::F64, Ty::F64],
        Ty::I64,
    ));
    fns.push(BuiltinFn::new("phys_step", vec![Ty::I64, Ty::F64], Ty::Void));

    // HTTP.
    fns.push(BuiltinFn::new("http_server", vec![Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("http_server_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::throwing(
        "http_serve",
        vec![Ty::I64],
        Ty::Void,
        &["net"],
    ));
    fns.push(BuiltinFn::new("http_client", vec![], Ty::I64));
    fns.push(BuiltinFn::new("http_client_free", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::throwing(
        "http_get",
        vec![Ty::I64, Ty::Str],
        Ty::Str,
        &["net"],
    ));

    // Files.
    fns.push(BuiltinFn::throwing(
        "file_read",
        vec![Ty::Str],
        Ty::Str,
        &["io"],
    ));
    fns.push(BuiltinFn::throwing(
        "file_write",
        vec![Ty::Str, Ty::Str],
        Ty::Void,
        &["io"],
    ));

    // Tasks. `spawn` itself is shape-checked specially (its argument must be
    // a zero-argument user call) and is not in the catalog.
    fns.push(BuiltinFn::new("await", vec![Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("await_all", vec![], Ty::Void));

    // Driver CLI token helpers.
    fns.push(BuiltinFn::new("cli_count", vec![], Ty::I64));
    fns.push(BuiltinFn::new("cli_token", vec![Ty::I64], Ty::Str));
    fns.push(BuiltinFn::new("cli_has", vec![Ty::Str], Ty::Bool));
    fns.push(BuiltinFn::new("cli_value", vec![Ty::Str], Ty::Str));

    // Misc.
    fns.push(BuiltinFn::new("clock_us", vec![], Ty::I64));
    fns.push(BuiltinFn::new("sleep_ms", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new("rand_i64", vec![Ty::I64, Ty::I64], Ty::I64));
    fns.push(BuiltinFn::new("exit", vec![Ty::I64], Ty::Void));
    fns.push(BuiltinFn::new("stateSpeed", vec![], Ty::Void));
    fns.push(BuiltinFn::new("superuser", vec![], Ty::Void));

    // Runtime introspection, locked behind superuser mode.
    fns.push(BuiltinFn::new("su.step_count", vec![], Ty::I64));
    fns.push(BuiltinFn::new("su.mem_used", vec![], Ty::I64));
    fns.push(BuiltinFn::new("su.stack_depth", vec![], Ty::I64));
    fns.push(BuiltinFn::new("su.trace", vec![Ty::Bool], Ty::Void));
    fns.push(BuiltinFn::new("su.dump_scope", vec![], Ty::Str));

    fns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_has_an_overload_per_printable_type() {
        let count = catalog().iter().filter(|f| f.name == "println").count();
        assert_eq!(count, 6);
    }

    #[test]
    fn owned_constructors_pair_with_free_functions() {
        assert_eq!(constructor_free_fn("array_new"), Some("array_free"));
        assert_eq!(constructor_free_fn("http_client"), Some("http_client_free"));
        assert_eq!(constructor_free_fn("println"), None);
    }

    #[test]
    fn throwing_builtins_declare_their_kinds() {
        let cat = catalog();
        let http_get = cat.iter().find(|f| f.name == "http_get").unwrap();
        assert_eq!(http_get.throws, &["net"]);
        let file_read = cat.iter().find(|f| f.name == "file_read").unwrap();
        assert_eq!(file_read.throws, &["io"]);
    }

    #[test]
    fn su_namespace_is_registered() {
        assert!(catalog().iter().any(|f| f.name == "su.step_count"));
    }
}
