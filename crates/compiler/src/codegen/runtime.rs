//! Runtime prelude tiers
//!
//! Three prelude variants are emitted into the translation unit, chosen by
//! inspecting the program:
//!
//! - **Ultra-minimal** (Windows targets only): direct `WriteFile` calls and
//!   no C runtime entry. Eligible when the program is nothing but
//!   `print`/`println` of literals.
//! - **Minimal**: `fputs`-based printing, numeric helpers, no string
//!   runtime and no format buffer.
//! - **Full**: thread-local format buffer, scratch string pool with heap
//!   promotion, collections, option/result, numeric arrays, and extern
//!   declarations for the heavy subsystems the runtime library provides
//!   (graphics, game window, physics, HTTP, tasks).
//!
//! Helper loops are written with `while` so reduction-folded programs emit
//! no `for` headers at all.

use super::EmitOptions;
use crate::ast::{Expr, ExprKind, Program, Stmt, StmtKind, Ty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeTier {
    UltraMinimal,
    Minimal,
    Full,
}

/// Builtins a minimal-tier program may call.
const MINIMAL_CALLS: &[&str] = &[
    "print",
    "println",
    "print_str",
    "println_str",
    "max",
    "min",
    "abs",
    "clamp",
    "clock_us",
    "sleep_ms",
    "rand_i64",
    "exit",
    "stateSpeed",
    ".stateSpeed",
];

const PRINT_CALLS: &[&str] = &["print", "println", "print_str", "println_str"];

/// Choose the runtime tier for a program.
pub fn select_tier(program: &Program, options: &EmitOptions) -> RuntimeTier {
    if options.superuser {
        return RuntimeTier::Full;
    }

    let mut usage = Usage::default();
    scan_program(program, &mut usage);

    if usage.literal_prints_only
        && !usage.uses_float
        && program.functions.is_empty()
        && !program.top_level.is_empty()
        && options.target.contains("windows")
    {
        return RuntimeTier::UltraMinimal;
    }

    if !usage.uses_str_values && !usage.uses_format_block && usage.calls_within_minimal {
        return RuntimeTier::Minimal;
    }

    RuntimeTier::Full
}

#[derive(Default)]
struct Usage {
    uses_str_values: bool,
    uses_format_block: bool,
    uses_float: bool,
    calls_within_minimal: bool,
    literal_prints_only: bool,
    /// Calls to user-defined symbols stay within the minimal tier.
    user_symbols: std::collections::HashSet<String>,
}

fn scan_program(program: &Program, usage: &mut Usage) {
    usage.calls_within_minimal = true;
    usage.literal_prints_only = !program.top_level.is_empty();
    usage.user_symbols = program.functions.iter().map(|f| f.name.clone()).collect();
    if !program.classes.is_empty() {
        usage.uses_str_values = true;
    }
    for func in &program.functions {
        if func.return_ty == Ty::Str || func.params.iter().any(|p| p.ty == Ty::Str) {
            usage.uses_str_values = true;
        }
    }
    for func in &program.functions {
        scan_block(&func.body, usage, false);
        usage.literal_prints_only = false;
    }
    scan_block(&program.top_level, usage, true);
}

fn scan_block(body: &[Stmt], usage: &mut Usage, top_level: bool) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                if top_level && !is_literal_print(e) {
                    usage.literal_prints_only = false;
                }
                scan_expr(e, usage);
            }
            StmtKind::Declare { init, declared_ty, .. } => {
                usage.literal_prints_only = false;
                if declared_ty == &Some(Ty::Str) || init.ty == Ty::Str {
                    usage.uses_str_values = true;
                }
                scan_expr(init, usage);
            }
            StmtKind::Assign { value, .. } => {
                usage.literal_prints_only = false;
                if value.ty == Ty::Str {
                    usage.uses_str_values = true;
                }
                scan_expr(value, usage);
            }
            StmtKind::Return(e) => {
                usage.literal_prints_only = false;
                if let Some(e) = e {
                    if e.ty == Ty::Str {
                        usage.uses_str_values = true;
                    }
                    scan_expr(e, usage);
                }
            }
            StmtKind::If { arms, else_body } => {
                usage.literal_prints_only = false;
                for arm in arms {
                    scan_expr(&arm.cond, usage);
                    scan_block(&arm.body, usage, false);
                }
                if let Some(b) = else_body {
                    scan_block(b, usage, false);
                }
            }
            StmtKind::While { cond, body } => {
                usage.literal_prints_only = false;
                scan_expr(cond, usage);
                scan_block(body, usage, false);
            }
            StmtKind::ForRange {
                start,
                stop,
                step,
                body,
                ..
            } => {
                usage.literal_prints_only = false;
                scan_expr(start, usage);
                scan_expr(stop, usage);
                if let Some(s) = step {
                    scan_expr(s, usage);
                }
                scan_block(body, usage, false);
            }
            StmtKind::FormatBlock { end_suffix, body } => {
                usage.literal_prints_only = false;
                usage.uses_format_block = true;
                if let Some(e) = end_suffix {
                    scan_expr(e, usage);
                }
                scan_block(body, usage, false);
            }
            StmtKind::Break | StmtKind::Continue => {
                usage.literal_prints_only = false;
            }
        }
    }
}

fn is_literal_print(expr: &Expr) -> bool {
    let ExprKind::Call { callee, args } = &expr.kind else {
        return false;
    };
    if !PRINT_CALLS.contains(&callee.as_str()) {
        return false;
    }
    let [arg] = args.as_slice() else {
        return false;
    };
    matches!(
        arg.kind,
        ExprKind::Str(_) | ExprKind::Int(_) | ExprKind::Bool(_)
    )
}

fn scan_expr(expr: &Expr, usage: &mut Usage) {
    if expr.ty.is_float() || matches!(expr.kind, ExprKind::Float(_)) {
        usage.uses_float = true;
    }
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            let minimal_ok = MINIMAL_CALLS.contains(&callee.as_str())
                || usage.user_symbols.contains(callee);
            if !minimal_ok {
                usage.calls_within_minimal = false;
            }
            for arg in args {
                // A string reaching anything but a literal print argument
                // needs the string runtime.
                if arg.ty == Ty::Str && !matches!(arg.kind, ExprKind::Str(_)) {
                    usage.uses_str_values = true;
                }
                scan_expr(arg, usage);
            }
        }
        ExprKind::Unary {
            operand,
            override_fn,
            ..
        } => {
            if override_fn.is_some() {
                usage.calls_within_minimal = false;
            }
            scan_expr(operand, usage);
        }
        ExprKind::Binary {
            lhs,
            rhs,
            override_fn,
            ..
        } => {
            if override_fn.is_some() {
                usage.calls_within_minimal = false;
            }
            if lhs.ty == Ty::Str && lhs.typed {
                usage.uses_str_values = true;
            }
            scan_expr(lhs, usage);
            scan_expr(rhs, usage);
        }
        _ => {}
    }
}

/// The prelude text for a tier. Assembled once per process from the
/// shared pieces below.
pub fn prelude(tier: RuntimeTier, options: &EmitOptions) -> &'static str {
    let _ = options;
    static MINIMAL: std::sync::OnceLock<&'static str> = std::sync::OnceLock::new();
    static FULL: std::sync::OnceLock<&'static str> = std::sync::OnceLock::new();
    match tier {
        RuntimeTier::UltraMinimal => ULTRA_MINIMAL_PRELUDE,
        RuntimeTier::Minimal => MINIMAL.get_or_init(|| {
            build_prelude(&[MINIMAL_PRELUDE_HEAD, NUMERIC_CORE, MINIMAL_PRINT])
        }),
        RuntimeTier::Full => FULL.get_or_init(|| {
            build_prelude(&[MINIMAL_PRELUDE_HEAD, NUMERIC_CORE, FULL_RUNTIME])
        }),
    }
}

/// Windows-only: direct WriteFile on the standard handle, no C runtime.
const ULTRA_MINIMAL_PRELUDE: &str = r#"
typedef unsigned long LsDword;
__declspec(dllimport) void *__stdcall GetStdHandle(LsDword kind);
__declspec(dllimport) int __stdcall WriteFile(void *handle, const void *data,
                                              LsDword len, LsDword *written,
                                              void *overlapped);
__declspec(dllimport) __declspec(noreturn) void __stdcall ExitProcess(unsigned int code);
#define LS_ALWAYS_INLINE __forceinline
static void *ls_um_handle;
static void ls_um_init(void) { ls_um_handle = GetStdHandle((LsDword)-11); }
static void ls_um_write(const char *text, unsigned long len) {
    LsDword written;
    WriteFile(ls_um_handle, text, len, &written, 0);
}
static void ls_um_exit(int code) { ExitProcess((unsigned int)code); }
"#;

/// Shared numeric core for the minimal and full tiers.
const NUMERIC_CORE: &str = r#"
#if defined(__SIZEOF_INT128__)
#define LS_HAS_INT128 1
#else
#define LS_HAS_INT128 0
#endif

#ifdef _OPENMP
#define LS_PRAGMA(x) _Pragma(#x)
#define LS_PAR_FOR_IF(cond) LS_PRAGMA(omp parallel for if(cond))
#define LS_OMP_SIMD LS_PRAGMA(omp simd)
#else
#define LS_PAR_FOR_IF(cond)
#define LS_OMP_SIMD
#endif
#define LS_VEC_HINT
#define LS_PAR_MIN_ITERS 65536

static int ls_argc;
static char **ls_argv;
static void ls_runtime_init(int argc, char **argv) {
    ls_argc = argc;
    ls_argv = argv;
}

static inline int64_t ls_trip_count(int64_t start, int64_t stop, int64_t step) {
    if (step > 0) return start >= stop ? 0 : (stop - start + step - 1) / step;
    if (step < 0) return start <= stop ? 0 : (start - stop - step - 1) / (-step);
    return 0;
}

#if LS_HAS_INT128
static inline __int128 ls_sum_i_i128(int64_t start, int64_t step, int64_t n) {
    __int128 t1 = ((__int128)n * (n - 1)) / 2;
    return (__int128)n * start + (__int128)step * t1;
}
static inline __int128 ls_sum_i2_i128(int64_t start, int64_t step, int64_t n) {
    __int128 t1 = ((__int128)n * (n - 1)) / 2;
    __int128 t2 = ((__int128)(n - 1) * n * (2 * (__int128)n - 1)) / 6;
    return (__int128)n * start * start
         + 2 * (__int128)start * step * t1
         + (__int128)step * step * t2;
}
static __int128 ls_floor_sum_i128(__int128 n, __int128 m, __int128 a, __int128 b) {
    __int128 ans = 0;
    while (1) {
        if (a >= m) { ans += (n - 1) * n / 2 * (a / m); a %= m; }
        if (b >= m) { ans += n * (b / m); b %= m; }
        __int128 y_max = a * n + b;
        if (y_max < m) return ans;
        __int128 t = m; n = y_max / m; b = y_max % m; m = a; a = t;
    }
}
static __int128 ls_sum_trunc_mod_i128(__int128 n, __int128 a, __int128 b, __int128 m) {
    if (n <= 0) return 0;
    if (a == 0) return n * (b % m);
    if (a < 0) return ls_sum_trunc_mod_i128(n, -a, a * (n - 1) + b, m);
    if (b >= 0) {
        __int128 t1 = (n - 1) * n / 2;
        return a * t1 + b * n - m * ls_floor_sum_i128(n, m, a, b);
    }
    __int128 k0 = (-b + a - 1) / a;
    if (k0 > n) k0 = n;
    return -ls_sum_trunc_mod_i128(k0, -a, -b, m)
         + ls_sum_trunc_mod_i128(n - k0, a, a * k0 + b, m);
}
static inline __int128 ls_sum_mod_linear_i128(int64_t a, int64_t b, int64_t m,
                                              int64_t start, int64_t step, int64_t n) {
    __int128 big_a = (__int128)a * step;
    __int128 big_b = (__int128)a * start + b;
    return ls_sum_trunc_mod_i128(n, big_a, big_b, m);
}
static inline __int128 ls_pair_weight_i128(int64_t a, int64_t b,
                                           int64_t start, int64_t step, int64_t n) {
    __int128 c = (__int128)a * start + b;
    __int128 d = (__int128)a * step;
    __int128 m = (__int128)n - 1;
    if (m <= 0) return 0;
    __int128 k1 = (m - 1) * m / 2;
    __int128 k2 = (m - 1) * m * (2 * m - 1) / 6;
    return c * (m * (m + 1) / 2) + d * (m * k1 - k2);
}
#endif

static inline int64_t ls_pow_i64(int64_t base, int64_t exp) {
    int64_t result = 1;
    while (exp > 0) {
        if (exp & 1) result *= base;
        exp >>= 1;
        if (exp) base *= base;
    }
    return result;
}
static inline double ls_pow_f64(double a, double b) { return pow(a, b); }
#define ls_pow(a, b) _Generic((a), \
    double: ls_pow_f64, float: ls_pow_f64, default: ls_pow_i64)((a), (b))

static inline int32_t ls_max_i32(int32_t a, int32_t b) { return a > b ? a : b; }
static inline int64_t ls_max_i64(int64_t a, int64_t b) { return a > b ? a : b; }
static inline float ls_max_f32(float a, float b) { return a > b ? a : b; }
static inline double ls_max_f64(double a, double b) { return a > b ? a : b; }
#define ls_max(a, b) _Generic((a), int32_t: ls_max_i32, int64_t: ls_max_i64, \
    float: ls_max_f32, double: ls_max_f64)((a), (b))
static inline int32_t ls_min_i32(int32_t a, int32_t b) { return a < b ? a : b; }
static inline int64_t ls_min_i64(int64_t a, int64_t b) { return a < b ? a : b; }
static inline float ls_min_f32(float a, float b) { return a < b ? a : b; }
static inline double ls_min_f64(double a, double b) { return a < b ? a : b; }
#define ls_min(a, b) _Generic((a), int32_t: ls_min_i32, int64_t: ls_min_i64, \
    float: ls_min_f32, double: ls_min_f64)((a), (b))
static inline int32_t ls_abs_i32(int32_t v) { return v < 0 ? -v : v; }
static inline int64_t ls_abs_i64(int64_t v) { return v < 0 ? -v : v; }
static inline float ls_abs_f32(float v) { return v < 0 ? -v : v; }
static inline double ls_abs_f64(double v) { return v < 0 ? -v : v; }
#define ls_abs(v) _Generic((v), int32_t: ls_abs_i32, int64_t: ls_abs_i64, \
    float: ls_abs_f32, double: ls_abs_f64)(v)
#define ls_clamp(v, lo, hi) ls_max(lo, ls_min(v, hi))

static inline int64_t ls_clock_us(void) {
    return (int64_t)((double)clock() * 1000000.0 / CLOCKS_PER_SEC);
}
static inline void ls_sleep_ms(int64_t ms) {
    int64_t end = ls_clock_us() + ms * 1000;
    while (ls_clock_us() < end) { }
}
static inline int64_t ls_rand_i64(int64_t lo, int64_t hi) {
    if (hi <= lo) return lo;
    return lo + rand() % (hi - lo);
}
static inline void ls_exit(int64_t code) { exit((int)code); }
"#;

const MINIMAL_PRELUDE_HEAD: &str = r#"
#include <stdint.h>
#include <stdbool.h>
#include <stdio.h>
#include <stdlib.h>
#include <math.h>
#include <time.h>
"#;

const MINIMAL_PRINT: &str = r#"
static inline void ls_print_str(const char *s) { fputs(s ? s : "", stdout); }
static inline void ls_println_str(const char *s) { ls_print_str(s); fputs("\n", stdout); }
static inline void ls_print_i64(int64_t v) {
    char buf[32];
    snprintf(buf, sizeof buf, "%lld", (long long)v);
    fputs(buf, stdout);
}
static inline void ls_print_i32(int32_t v) { ls_print_i64(v); }
static inline void ls_print_f64(double v) {
    char buf[40];
    snprintf(buf, sizeof buf, "%g", v);
    fputs(buf, stdout);
}
static inline void ls_print_f32(float v) { ls_print_f64(v); }
static inline void ls_print_bool(bool v) { fputs(v ? "true" : "false", stdout); }
#define ls_print(x) _Generic((x), int32_t: ls_print_i32, int64_t: ls_print_i64, \
    float: ls_print_f32, double: ls_print_f64, bool: ls_print_bool, \
    char *: ls_print_str, const char *: ls_print_str)(x)
static inline void ls_println_i64(int64_t v) { ls_print_i64(v); fputs("\n", stdout); }
static inline void ls_println_i32(int32_t v) { ls_println_i64(v); }
static inline void ls_println_f64(double v) { ls_print_f64(v); fputs("\n", stdout); }
static inline void ls_println_f32(float v) { ls_println_f64(v); }
static inline void ls_println_bool(bool v) { ls_print_bool(v); fputs("\n", stdout); }
#define ls_println(x) _Generic((x), int32_t: ls_println_i32, int64_t: ls_println_i64, \
    float: ls_println_f32, double: ls_println_f64, bool: ls_println_bool, \
    char *: ls_println_str, const char *: ls_println_str)(x)
static inline void ls_state_speed(int64_t start_us) {
    fprintf(stderr, "stateSpeed: %lld us\n", (long long)(ls_clock_us() - start_us));
}
"#;

const FULL_RUNTIME: &str = r#"
#include <string.h>

/* ---- scratch pool and format buffer ---- */

static _Thread_local char ls_scratch_pool[8192];
static _Thread_local size_t ls_scratch_pos;
static _Thread_local struct {
    char *buf;
    size_t len, cap;
    int active;
} ls_fmt;

static char *ls_scratch_alloc(size_t n) {
    if (n > sizeof ls_scratch_pool) return (char *)malloc(n);
    if (ls_scratch_pos + n > sizeof ls_scratch_pool) ls_scratch_pos = 0;
    char *p = ls_scratch_pool + ls_scratch_pos;
    ls_scratch_pos += n;
    return p;
}

/* Promote references into the shared buffers to owned heap copies. */
static const char *ls_str_hold(const char *s) {
    if (!s) return "";
    int in_scratch = s >= ls_scratch_pool && s < ls_scratch_pool + sizeof ls_scratch_pool;
    int in_fmt = ls_fmt.buf && s >= ls_fmt.buf && s < ls_fmt.buf + ls_fmt.cap;
    if (!in_scratch && !in_fmt) return s;
    size_t n = strlen(s) + 1;
    char *copy = (char *)malloc(n);
    memcpy(copy, s, n);
    return copy;
}

static void ls_fmt_append(const char *s, size_t n) {
    if (ls_fmt.len + n + 1 > ls_fmt.cap) {
        size_t cap = ls_fmt.cap ? ls_fmt.cap : 256;
        while (cap < ls_fmt.len + n + 1) cap *= 2;
        ls_fmt.buf = (char *)realloc(ls_fmt.buf, cap);
        ls_fmt.cap = cap;
    }
    memcpy(ls_fmt.buf + ls_fmt.len, s, n);
    ls_fmt.len += n;
    ls_fmt.buf[ls_fmt.len] = 0;
}

static void ls_emit_text(const char *s) {
    if (!s) return;
    if (ls_fmt.active) {
        ls_fmt_append(s, strlen(s));
        return;
    }
    fwrite(s, 1, strlen(s), stdout);
}

static void ls_format_begin(void) {
    ls_fmt.active = 1;
    ls_fmt.len = 0;
    if (ls_fmt.buf) ls_fmt.buf[0] = 0;
}
static const char *ls_format_end(const char *suffix) {
    ls_fmt.active = 0;
    if (suffix && *suffix) ls_fmt_append(suffix, strlen(suffix));
    return ls_fmt.buf ? ls_fmt.buf : "";
}
static void ls_format_abort(void) {
    ls_fmt.active = 0;
    ls_fmt.len = 0;
}

/* ---- formatting and printing ---- */

static const char *ls_format_i64(int64_t v) {
    char *p = ls_scratch_alloc(32);
    snprintf(p, 32, "%lld", (long long)v);
    return p;
}
static const char *ls_format_i32(int32_t v) { return ls_format_i64(v); }
static const char *ls_format_f64(double v) {
    char *p = ls_scratch_alloc(40);
    snprintf(p, 40, "%g", v);
    return p;
}
static const char *ls_format_f32(float v) { return ls_format_f64(v); }
static const char *ls_format_bool(bool v) { return v ? "true" : "false"; }
static const char *ls_format_str(const char *v) { return v ? v : ""; }
#define ls_format_value(x) _Generic((x), int32_t: ls_format_i32, int64_t: ls_format_i64, \
    float: ls_format_f32, double: ls_format_f64, bool: ls_format_bool, \
    char *: ls_format_str, const char *: ls_format_str)(x)

static inline void ls_print_str(const char *s) { ls_emit_text(s); }
static inline void ls_println_str(const char *s) { ls_print_str(s); ls_emit_text("\n"); }
static inline void ls_print_i64(int64_t v) { ls_emit_text(ls_format_i64(v)); }
static inline void ls_print_i32(int32_t v) { ls_print_i64(v); }
static inline void ls_print_f64(double v) { ls_emit_text(ls_format_f64(v)); }
static inline void ls_print_f32(float v) { ls_print_f64(v); }
static inline void ls_print_bool(bool v) { ls_emit_text(v ? "true" : "false"); }
#define ls_print(x) _Generic((x), int32_t: ls_print_i32, int64_t: ls_print_i64, \
    float: ls_print_f32, double: ls_print_f64, bool: ls_print_bool, \
    char *: ls_print_str, const char *: ls_print_str)(x)
static inline void ls_println_i64(int64_t v) { ls_print_i64(v); ls_emit_text("\n"); }
static inline void ls_println_i32(int32_t v) { ls_println_i64(v); }
static inline void ls_println_f64(double v) { ls_print_f64(v); ls_emit_text("\n"); }
static inline void ls_println_f32(float v) { ls_println_f64(v); }
static inline void ls_println_bool(bool v) { ls_print_bool(v); ls_emit_text("\n"); }
#define ls_println(x) _Generic((x), int32_t: ls_println_i32, int64_t: ls_println_i64, \
    float: ls_println_f32, double: ls_println_f64, bool: ls_println_bool, \
    char *: ls_println_str, const char *: ls_println_str)(x)

static inline void ls_state_speed(int64_t start_us) {
    fprintf(stderr, "stateSpeed: %lld us\n", (long long)(ls_clock_us() - start_us));
}

/* ---- strings ---- */

static inline int64_t ls_str_len(const char *s) { return (int64_t)strlen(s ? s : ""); }
static inline bool ls_str_eq(const char *a, const char *b) {
    return strcmp(a ? a : "", b ? b : "") == 0;
}
static inline bool ls_str_neq(const char *a, const char *b) { return !ls_str_eq(a, b); }
static const char *ls_str_concat(const char *a, const char *b) {
    size_t la = strlen(a ? a : ""), lb = strlen(b ? b : "");
    char *p = ls_scratch_alloc(la + lb + 1);
    memcpy(p, a ? a : "", la);
    memcpy(p + la, b ? b : "", lb + 1);
    return p;
}
static const char *ls_str_sub(const char *s, int64_t from, int64_t len) {
    int64_t total = ls_str_len(s);
    if (from < 0) from = 0;
    if (from > total) from = total;
    if (len < 0) len = 0;
    if (from + len > total) len = total - from;
    char *p = ls_scratch_alloc((size_t)len + 1);
    memcpy(p, s + from, (size_t)len);
    p[len] = 0;
    return p;
}
static inline int64_t ls_str_find(const char *hay, const char *needle) {
    const char *found = strstr(hay ? hay : "", needle ? needle : "");
    return found ? (int64_t)(found - hay) : -1;
}
static const char *ls_to_upper(const char *s) {
    size_t n = strlen(s ? s : "");
    char *p = ls_scratch_alloc(n + 1);
    size_t i = 0;
    while (i <= n) {
        char c = s[i];
        p[i] = (c >= 'a' && c <= 'z') ? (char)(c - 32) : c;
        i++;
    }
    return p;
}
static const char *ls_to_lower(const char *s) {
    size_t n = strlen(s ? s : "");
    char *p = ls_scratch_alloc(n + 1);
    size_t i = 0;
    while (i <= n) {
        char c = s[i];
        p[i] = (c >= 'A' && c <= 'Z') ? (char)(c + 32) : c;
        i++;
    }
    return p;
}
static inline int64_t ls_parse_i64(const char *s) {
    return s ? strtoll(s, NULL, 10) : 0;
}
static inline double ls_parse_f64(const char *s) { return s ? strtod(s, NULL) : 0.0; }
static inline int64_t ls_bool_to_i64(bool v) { return v ? 1 : 0; }
static const char *ls_input(void) {
    char *p = ls_scratch_alloc(1024);
    if (!fgets(p, 1024, stdin)) p[0] = 0;
    size_t n = strlen(p);
    if (n && p[n - 1] == '\n') p[n - 1] = 0;
    return p;
}

/* ---- collections ---- */

typedef struct {
    char **items;
    int64_t len, cap;
} LsArray;

static int64_t ls_array_new(void) {
    LsArray *a = (LsArray *)calloc(1, sizeof *a);
    return (int64_t)(intptr_t)a;
}
static void ls_array_free(int64_t h) {
    LsArray *a = (LsArray *)(intptr_t)h;
    if (!a) return;
    int64_t i = 0;
    while (i < a->len) free(a->items[i++]);
    free(a->items);
    free(a);
}
static void ls_array_push(int64_t h, const char *v) {
    LsArray *a = (LsArray *)(intptr_t)h;
    if (a->len == a->cap) {
        a->cap = a->cap ? a->cap * 2 : 8;
        a->items = (char **)realloc(a->items, (size_t)a->cap * sizeof *a->items);
    }
    a->items[a->len++] = strdup(v ? v : "");
}
static const char *ls_array_get(int64_t h, int64_t idx) {
    LsArray *a = (LsArray *)(intptr_t)h;
    if (idx < 0 || idx >= a->len) return "";
    return a->items[idx];
}
static void ls_array_set(int64_t h, int64_t idx, const char *v) {
    LsArray *a = (LsArray *)(intptr_t)h;
    if (idx < 0 || idx >= a->len) return;
    free(a->items[idx]);
    a->items[idx] = strdup(v ? v : "");
}
static inline int64_t ls_array_len(int64_t h) {
    return ((LsArray *)(intptr_t)h)->len;
}

typedef struct LsPair {
    char *key;
    char *value;
    struct LsPair *next;
} LsPair;
typedef struct {
    LsPair *head;
    int64_t len;
} LsDict;

static int64_t ls_dict_new(void) {
    return (int64_t)(intptr_t)calloc(1, sizeof(LsDict));
}
static void ls_dict_free(int64_t h) {
    LsDict *d = (LsDict *)(intptr_t)h;
    if (!d) return;
    LsPair *p = d->head;
    while (p) {
        LsPair *next = p->next;
        free(p->key);
        free(p->value);
        free(p);
        p = next;
    }
    free(d);
}
static void ls_dict_set(int64_t h, const char *k, const char *v) {
    LsDict *d = (LsDict *)(intptr_t)h;
    LsPair *p = d->head;
    while (p) {
        if (strcmp(p->key, k) == 0) {
            free(p->value);
            p->value = strdup(v ? v : "");
            return;
        }
        p = p->next;
    }
    p = (LsPair *)malloc(sizeof *p);
    p->key = strdup(k);
    p->value = strdup(v ? v : "");
    p->next = d->head;
    d->head = p;
    d->len++;
}
static const char *ls_dict_get(int64_t h, const char *k) {
    LsPair *p = ((LsDict *)(intptr_t)h)->head;
    while (p) {
        if (strcmp(p->key, k) == 0) return p->value;
        p = p->next;
    }
    return "";
}
static bool ls_dict_has(int64_t h, const char *k) {
    LsPair *p = ((LsDict *)(intptr_t)h)->head;
    while (p) {
        if (strcmp(p->key, k) == 0) return true;
        p = p->next;
    }
    return false;
}
static inline int64_t ls_dict_len(int64_t h) { return ((LsDict *)(intptr_t)h)->len; }

typedef struct LsMapPair {
    int64_t key, value;
    struct LsMapPair *next;
} LsMapPair;
typedef struct {
    LsMapPair *head;
    int64_t len;
} LsMap;

static int64_t ls_map_new(void) { return (int64_t)(intptr_t)calloc(1, sizeof(LsMap)); }
static void ls_map_free(int64_t h) {
    LsMap *m = (LsMap *)(intptr_t)h;
    if (!m) return;
    LsMapPair *p = m->head;
    while (p) {
        LsMapPair *next = p->next;
        free(p);
        p = next;
    }
    free(m);
}
static void ls_map_set(int64_t h, int64_t k, int64_t v) {
    LsMap *m = (LsMap *)(intptr_t)h;
    LsMapPair *p = m->head;
    while (p) {
        if (p->key == k) {
            p->value = v;
            return;
        }
        p = p->next;
    }
    p = (LsMapPair *)malloc(sizeof *p);
    p->key = k;
    p->value = v;
    p->next = m->head;
    m->head = p;
    m->len++;
}
static int64_t ls_map_get(int64_t h, int64_t k) {
    LsMapPair *p = ((LsMap *)(intptr_t)h)->head;
    while (p) {
        if (p->key == k) return p->value;
        p = p->next;
    }
    return 0;
}
static bool ls_map_has(int64_t h, int64_t k) {
    LsMapPair *p = ((LsMap *)(intptr_t)h)->head;
    while (p) {
        if (p->key == k) return true;
        p = p->next;
    }
    return false;
}
static inline int64_t ls_map_len(int64_t h) { return ((LsMap *)(intptr_t)h)->len; }

/* The string-keyed object store backing class instances. */
typedef struct {
    char *class_name;
    int64_t fields;
} LsObject;

static int64_t ls_object_new(const char *class_name) {
    LsObject *o = (LsObject *)malloc(sizeof *o);
    o->class_name = strdup(class_name ? class_name : "");
    o->fields = ls_dict_new();
    return (int64_t)(intptr_t)o;
}
static void ls_object_free(int64_t h) {
    LsObject *o = (LsObject *)(intptr_t)h;
    if (!o) return;
    ls_dict_free(o->fields);
    free(o->class_name);
    free(o);
}
static void ls_object_set(int64_t h, const char *name, const char *value) {
    ls_dict_set(((LsObject *)(intptr_t)h)->fields, name, value);
}
static const char *ls_object_get(int64_t h, const char *name) {
    return ls_dict_get(((LsObject *)(intptr_t)h)->fields, name);
}

/* Option / result handles. */
typedef struct {
    int ok;
    char *value;
} LsOption;

static int64_t ls_option_new(void) {
    return (int64_t)(intptr_t)calloc(1, sizeof(LsOption));
}
static void ls_option_free(int64_t h) {
    LsOption *o = (LsOption *)(intptr_t)h;
    if (!o) return;
    free(o->value);
    free(o);
}
static void ls_option_set(int64_t h, const char *v) {
    LsOption *o = (LsOption *)(intptr_t)h;
    free(o->value);
    o->value = strdup(v ? v : "");
    o->ok = 1;
}
static inline bool ls_option_is_some(int64_t h) {
    return ((LsOption *)(intptr_t)h)->ok != 0;
}
static const char *ls_option_get(int64_t h) {
    LsOption *o = (LsOption *)(intptr_t)h;
    return o->value ? o->value : "";
}
static int64_t ls_result_new(void) { return ls_option_new(); }
static void ls_result_free(int64_t h) { ls_option_free(h); }
static void ls_result_ok(int64_t h, const char *v) { ls_option_set(h, v); }
static void ls_result_err(int64_t h, const char *v) {
    LsOption *o = (LsOption *)(intptr_t)h;
    free(o->value);
    o->value = strdup(v ? v : "");
    o->ok = 0;
}
static inline bool ls_result_is_ok(int64_t h) { return ls_option_is_some(h); }
static const char *ls_result_get(int64_t h) { return ls_option_get(h); }

/* Numeric array. */
typedef struct {
    double *data;
    int64_t len;
} LsNp;

static int64_t ls_np_array(int64_t len) {
    LsNp *a = (LsNp *)malloc(sizeof *a);
    a->len = len < 0 ? 0 : len;
    a->data = (double *)calloc((size_t)a->len, sizeof(double));
    return (int64_t)(intptr_t)a;
}
static void ls_np_free(int64_t h) {
    LsNp *a = (LsNp *)(intptr_t)h;
    if (!a) return;
    free(a->data);
    free(a);
}
static void ls_np_set(int64_t h, int64_t i, double v) {
    LsNp *a = (LsNp *)(intptr_t)h;
    if (i >= 0 && i < a->len) a->data[i] = v;
}
static double ls_np_get(int64_t h, int64_t i) {
    LsNp *a = (LsNp *)(intptr_t)h;
    return (i >= 0 && i < a->len) ? a->data[i] : 0.0;
}
static double ls_np_sum(int64_t h) {
    LsNp *a = (LsNp *)(intptr_t)h;
    double total = 0.0;
    int64_t i = 0;
    while (i < a->len) total += a->data[i++];
    return total;
}
static double ls_np_dot(int64_t h1, int64_t h2) {
    LsNp *a = (LsNp *)(intptr_t)h1;
    LsNp *b = (LsNp *)(intptr_t)h2;
    int64_t n = a->len < b->len ? a->len : b->len;
    double total = 0.0;
    int64_t i = 0;
    while (i < n) {
        total += a->data[i] * b->data[i];
        i++;
    }
    return total;
}

/* ---- files ---- */

static const char *ls_file_read(const char *path) {
    FILE *f = fopen(path, "rb");
    if (!f) return "";
    fseek(f, 0, SEEK_END);
    long n = ftell(f);
    fseek(f, 0, SEEK_SET);
    char *p = (char *)malloc((size_t)n + 1);
    size_t got = fread(p, 1, (size_t)n, f);
    p[got] = 0;
    fclose(f);
    return p;
}
static void ls_file_write(const char *path, const char *text) {
    FILE *f = fopen(path, "wb");
    if (!f) return;
    fwrite(text ? text : "", 1, strlen(text ? text : ""), f);
    fclose(f);
}

/* ---- driver CLI tokens ---- */

static inline int64_t ls_cli_count(void) { return ls_argc; }
static const char *ls_cli_token(int64_t i) {
    return (i >= 0 && i < ls_argc) ? ls_argv[i] : "";
}
static bool ls_cli_has(const char *flag) {
    int i = 1;
    while (i < ls_argc) {
        const char *arg = ls_argv[i++];
        if (arg[0] == '-' && arg[1] == '-' && strcmp(arg + 2, flag) == 0) return true;
    }
    return false;
}
static const char *ls_cli_value(const char *flag) {
    int i = 1;
    while (i + 1 < ls_argc) {
        const char *arg = ls_argv[i];
        if (arg[0] == '-' && arg[1] == '-' && strcmp(arg + 2, flag) == 0)
            return ls_argv[i + 1];
        i++;
    }
    return "";
}

/* ---- superuser instrumentation ---- */

#define LS_SU_STEP_BUDGET (1LL << 40)
#define LS_SU_MEM_BUDGET (1LL << 32)
static _Thread_local int64_t ls_su_steps;
static int ls_su_trace_on;
static inline void ls_superuser_enable(void) { }
static inline int64_t ls_su_step_count(void) { return ls_su_steps; }
static inline int64_t ls_su_mem_used(void) { return 0; }
static inline int64_t ls_su_stack_depth(void) { return 0; }
static inline void ls_su_trace(bool on) { ls_su_trace_on = on; }
static inline const char *ls_su_dump_scope(void) { return ""; }
static void ls_su_guard(int64_t line) {
    ls_su_steps++;
    if (ls_su_steps > LS_SU_STEP_BUDGET) {
        fprintf(stderr, "superuser: step budget exceeded near line %lld\n", (long long)line);
        exit(1);
    }
    if (ls_su_trace_on)
        fprintf(stderr, "superuser: line %lld\n", (long long)line);
}

static void ls_throw(const char *kind, const char *msg) {
    fprintf(stderr, "uncaught %s: %s\n", kind ? kind : "?", msg ? msg : "");
    exit(1);
}
static inline void ls_free_console(void) { }

/* ---- heavy subsystems (provided by the runtime library) ---- */

extern int64_t ls_spawn(int64_t (*fn)(void));
extern int64_t ls_await(int64_t task);
extern void ls_await_all(void);
extern int64_t ls_gfx_window(int64_t w, int64_t h);
extern void ls_gfx_free(int64_t h);
extern void ls_gfx_draw_rect(int64_t h, int64_t x, int64_t y, int64_t w, int64_t hgt);
extern void ls_gfx_present(int64_t h);
extern int64_t ls_game_window(int64_t w, int64_t h);
extern void ls_game_free(int64_t h);
extern int64_t ls_game_poll(int64_t h);
extern bool ls_game_key_down(int64_t h, int64_t key);
extern int64_t ls_pg_surface(int64_t w, int64_t h);
extern void ls_pg_surface_free(int64_t h);
extern void ls_pg_blit(int64_t dst, int64_t src, int64_t x, int64_t y);
extern int64_t ls_phys_world(void);
extern void ls_phys_free(int64_t h);
extern int64_t ls_phys_add_body(int64_t h, double x, double y);
extern void ls_phys_step(int64_t h, double dt);
extern int64_t ls_http_server(int64_t port);
extern void ls_http_server_free(int64_t h);
extern void ls_http_serve(int64_t h);
extern int64_t ls_http_client(void);
extern void ls_http_client_free(int64_t h);
extern const char *ls_http_get(int64_t h, const char *url);
"#;

/// Built lazily so the pieces stay readable; leaked once per process.
fn build_prelude(parts: &[&str]) -> &'static str {
    Box::leak(parts.concat().into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;

    fn tier_of(source: &str, target: &str) -> RuntimeTier {
        let mut program = parse_source(source).expect("parse");
        TypeChecker::new()
            .check_program(&mut program)
            .expect("typecheck");
        let options = EmitOptions {
            target: target.to_string(),
            ..EmitOptions::default()
        };
        select_tier(&program, &options)
    }

    #[test]
    fn literal_prints_on_windows_select_ultra_minimal() {
        let tier = tier_of(
            "println(\"hello\")\nprintln(42)\n",
            "x86_64-pc-windows-msvc",
        );
        assert_eq!(tier, RuntimeTier::UltraMinimal);
    }

    #[test]
    fn literal_prints_elsewhere_select_minimal() {
        let tier = tier_of("println(\"hello\")\nprintln(42)\n", "x86_64-unknown-linux-gnu");
        assert_eq!(tier, RuntimeTier::Minimal);
    }

    #[test]
    fn numeric_program_with_functions_is_minimal() {
        let source = "fn add(a: i64, b: i64) -> i64 {\n  return a + b\n}\nfn main() -> i64 {\n  println(add(1, 2))\n  return 0\n}\n";
        assert_eq!(tier_of(source, ""), RuntimeTier::Minimal);
    }

    #[test]
    fn string_binding_forces_full() {
        let source = "declare s = formatOutput(1)\nprintln(s)\n";
        assert_eq!(tier_of(source, ""), RuntimeTier::Full);
    }

    #[test]
    fn format_block_forces_full() {
        let source = "formatOutput() do\n  print(\"x\")\nend\n";
        assert_eq!(tier_of(source, ""), RuntimeTier::Full);
    }

    #[test]
    fn classes_force_full() {
        let source = "class P {\n  declare x: i64\n}\nfn main() -> i64 {\n  declare p = P()\n  return p.x\n}\n";
        assert_eq!(tier_of(source, ""), RuntimeTier::Full);
    }

    #[test]
    fn superuser_forces_full() {
        let mut program = parse_source("superuser()\nprintln(1)\n").unwrap();
        TypeChecker::new().check_program(&mut program).unwrap();
        let options = EmitOptions {
            superuser: true,
            ..EmitOptions::default()
        };
        assert_eq!(select_tier(&program, &options), RuntimeTier::Full);
    }

    #[test]
    fn float_program_never_ultra_minimal() {
        let tier = tier_of("println(1.5)\n", "x86_64-pc-windows-msvc");
        assert_ne!(tier, RuntimeTier::UltraMinimal);
    }

    #[test]
    fn preludes_avoid_for_headers() {
        // Reduction-folded programs must emit no `for (` at all, so the
        // prelude itself must not contain one.
        for tier in [RuntimeTier::Minimal, RuntimeTier::Full] {
            let text = prelude(tier, &EmitOptions::default());
            assert!(!text.contains("for ("), "prelude for {:?} has a for header", tier);
        }
    }

    #[test]
    fn full_prelude_carries_reduction_helpers() {
        let text = prelude(RuntimeTier::Full, &EmitOptions::default());
        assert!(text.contains("ls_sum_mod_linear_i128"));
        assert!(text.contains("ls_pair_weight_i128"));
        assert!(text.contains("ls_str_hold"));
        assert!(text.contains("LS_PAR_FOR_IF"));
    }

    #[test]
    fn ultra_minimal_prelude_has_no_stdio() {
        assert!(!ULTRA_MINIMAL_PRELUDE.contains("fputs"));
        assert!(!ULTRA_MINIMAL_PRELUDE.contains("scratch"));
        assert!(ULTRA_MINIMAL_PRELUDE.contains("WriteFile"));
    }
}
