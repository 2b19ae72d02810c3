//! The `__builtin__` functions and built-in methods of the reference host.

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use shimrt_core::{CodeSpec, ExceptionKind, Host, HostError, HostResult, ObjRef};

use crate::ReferenceHost;
use crate::native::NativeFn;
use crate::object::{FileData, Payload};

/// Longest list `range` will materialize.
pub const MAX_RANGE_ITEMS: u64 = 1 << 26;

/// Functions installed into `__builtin__`.
pub fn functions() -> Vec<NativeFn> {
    vec![
        NativeFn::new("range", range),
        NativeFn::new("open", open),
        NativeFn::new("compile", compile),
        NativeFn::new("len", len),
    ]
}

/// Methods of byte strings and unicode text.
pub fn text_method(name: &str) -> Option<NativeFn> {
    match name {
        "strip" => Some(NativeFn::new("strip", strip)),
        _ => None,
    }
}

/// Methods of file objects.
pub fn file_method(name: &str) -> Option<NativeFn> {
    match name {
        "read" => Some(NativeFn::new("read", file_read)),
        "write" => Some(NativeFn::new("write", file_write)),
        "close" => Some(NativeFn::new("close", file_close)),
        _ => None,
    }
}

fn arity(name: &str, args: &[ObjRef], min: usize, max: usize) -> HostResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {min}")
        } else if args.len() < min {
            format!("at least {min}")
        } else {
            format!("at most {max}")
        };
        let plural = if expected.ends_with(" 1") { "" } else { "s" };
        return Err(HostError::type_error(format!(
            "{name}() takes {expected} argument{plural} ({} given)",
            args.len()
        )));
    }
    Ok(())
}

// =============================================================================
// range
// =============================================================================

fn range_operand(host: &ReferenceHost, obj: ObjRef, name: &str) -> HostResult<BigInt> {
    if let Some(value) = host.int_value(obj) {
        return Ok(value);
    }
    let is_instance = host
        .with_payload(obj, |p| matches!(p, Payload::Instance(_)))
        .unwrap_or(false);
    if is_instance && let Some(converted) = host.integer_slot(obj) {
        let converted = host.own(converted?);
        if let Some(value) = host.int_value(converted.get()) {
            return Ok(value);
        }
    }
    Err(HostError::type_error(format!(
        "range() integer {name} argument expected, got {}.",
        host.type_name_of(obj)
    )))
}

/// `range([start,] stop[, step])` over arbitrary-precision integers.
pub fn range(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("range", args, 1, 3)?;
    let (start, stop, step) = match args {
        [stop] => (BigInt::zero(), range_operand(host, *stop, "end")?, BigInt::one()),
        [start, stop] => (
            range_operand(host, *start, "start")?,
            range_operand(host, *stop, "end")?,
            BigInt::one(),
        ),
        [start, stop, step] => (
            range_operand(host, *start, "start")?,
            range_operand(host, *stop, "end")?,
            range_operand(host, *step, "step")?,
        ),
        _ => return Err(HostError::type_error("range expected at most 3 arguments")),
    };
    if step.is_zero() {
        return Err(HostError::value("range() step argument must not be zero"));
    }

    let span = if step.is_positive() {
        &stop - &start
    } else {
        &start - &stop
    };
    let count = if span.is_positive() {
        (span - 1) / step.abs() + 1
    } else {
        BigInt::zero()
    };
    let count = count
        .to_u64()
        .filter(|n| *n <= MAX_RANGE_ITEMS)
        .ok_or_else(|| HostError::overflow("range() result has too many items"))?;

    let mut items = Vec::with_capacity(count as usize);
    let mut current = start;
    for _ in 0..count {
        items.push(host.new_integer(current.clone()));
        current += &step;
    }
    Ok(host.new_list_from(items))
}

// =============================================================================
// open
// =============================================================================

/// `open(name[, mode[, buffering]])`. Read modes load the file from disk;
/// write modes buffer in memory.
pub fn open(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    if args.is_empty() {
        return Err(HostError::type_error(
            "Required argument 'name' (pos 1) not found",
        ));
    }
    arity("open", args, 1, 3)?;
    let name = host.text_contents(args[0]).ok_or_else(|| {
        HostError::type_error(format!(
            "coercing to Unicode: need string or buffer, {} found",
            host.type_name_of(args[0])
        ))
    })?;
    let mode = match args.get(1) {
        Some(mode) => host.text_contents(*mode).ok_or_else(|| {
            HostError::type_error(format!(
                "open() argument 2 must be string, not {}",
                host.type_name_of(*mode)
            ))
        })?,
        None => "r".to_string(),
    };
    if let Some(buffering) = args.get(2) {
        host.as_i64(*buffering)?;
    }
    if !mode.starts_with(['r', 'w', 'a', 'U']) {
        return Err(HostError::value(format!(
            "mode string must begin with one of 'r', 'w', 'a' or 'U', not '{mode}'"
        )));
    }

    let mut data = FileData::new(name.clone(), mode.clone());
    if mode.starts_with(['r', 'U']) {
        data.buffer = std::fs::read(&name).map_err(|err| {
            HostError::new(
                ExceptionKind::Io,
                format!("[Errno {}] {err}: '{name}'", err.raw_os_error().unwrap_or(0)),
            )
        })?;
    }
    tracing::debug!(target: "shimrt_host", file = %name, mode = %mode, "open");
    Ok(host.new_file_with(data))
}

// =============================================================================
// compile
// =============================================================================

/// `compile(source, filename, mode[, flags[, dont_inherit]])`.
///
/// No bytecode is produced: the code record's body holds the source text.
pub fn compile(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("compile", args, 3, 5)?;
    let source = host.text_contents(args[0]).ok_or_else(|| {
        HostError::type_error("compile() expected string without null bytes")
    })?;
    if !host.is_text(args[1]) {
        return Err(HostError::type_error(format!(
            "compile() argument 2 must be string, not {}",
            host.type_name_of(args[1])
        )));
    }
    let mode = host.text_contents(args[2]).unwrap_or_default();
    if !matches!(mode.as_str(), "exec" | "eval" | "single") {
        return Err(HostError::value(
            "compile() arg 3 must be 'exec', 'eval' or 'single'",
        ));
    }
    let flags = match args.get(3) {
        Some(flags) => host.as_i64(*flags)?,
        None => 0,
    };
    let flags = u32::try_from(flags)
        .map_err(|_| HostError::value(format!("compile(): unrecognised flags {flags}")))?;
    if mode != "exec" && source.starts_with([' ', '\t']) {
        return Err(HostError::new(ExceptionKind::Syntax, "unexpected indent"));
    }

    let body = host.own(host.new_buffer(source.as_bytes())?);
    let name = host.own(host.new_str("<module>")?);
    let empty = host.empty_tuple();
    let lnotab = host.empty_str();
    host.new_code(&CodeSpec {
        arg_count: 0,
        local_count: 0,
        stack_size: 0,
        flags,
        code: body.get(),
        consts: empty,
        names: empty,
        varnames: empty,
        freevars: empty,
        cellvars: empty,
        filename: args[1],
        name: name.get(),
        first_line: 1,
        lnotab,
    })
}

// =============================================================================
// len / type.__init__
// =============================================================================

pub fn len(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("len", args, 1, 1)?;
    let size = host.size(args[0])?;
    host.new_int(size as i64)
}

/// Initializer of `type`: accepts the one- and three-argument forms.
pub fn type_init(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    let [_, tuple] = args else {
        return Err(HostError::type_error("type.__init__() takes 1 or 3 arguments"));
    };
    match host.sequence_items(*tuple).map(|items| items.len()) {
        Some(1 | 3) => {
            let none = host.none();
            host.incref(none);
            Ok(none)
        }
        _ => Err(HostError::type_error("type.__init__() takes 1 or 3 arguments")),
    }
}

// =============================================================================
// Methods
// =============================================================================

fn strip(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("strip", args, 1, 1)?;
    enum Stripped {
        Bytes(Vec<u8>),
        Unicode(String),
    }
    let stripped = host
        .with_payload(args[0], |payload| match payload {
            Payload::Bytes(b) => Some(Stripped::Bytes(b.trim_ascii().to_vec())),
            Payload::Unicode(s) => Some(Stripped::Unicode(s.trim().to_string())),
            _ => None,
        })
        .flatten()
        .ok_or_else(|| HostError::type_error("descriptor 'strip' requires a string"))?;
    match stripped {
        Stripped::Bytes(data) => host.new_bytes(&data),
        Stripped::Unicode(text) => Ok(host.new_unicode(&text)),
    }
}

fn file_read(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("read", args, 1, 1)?;
    let remaining = host
        .with_payload_mut(args[0], |payload| match payload {
            Payload::File(data) => {
                let rest = data.buffer.get(data.position..).unwrap_or_default().to_vec();
                data.position = data.buffer.len();
                Some(rest)
            }
            _ => None,
        })
        .flatten()
        .ok_or_else(|| HostError::type_error("descriptor 'read' requires a 'file' object"))?;
    host.new_bytes(&remaining)
}

fn file_write(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("write", args, 2, 2)?;
    if !host.is_file(args[0]) {
        return Err(HostError::type_error("descriptor 'write' requires a 'file' object"));
    }
    if !host.is_text(args[1]) {
        return Err(HostError::type_error(format!(
            "expected a string or other character buffer object, got {}",
            host.type_name_of(args[1])
        )));
    }
    host.write_object(args[0], args[1], true)?;
    let none = host.none();
    host.incref(none);
    Ok(none)
}

fn file_close(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    arity("close", args, 1, 1)?;
    let none = host.none();
    host.incref(none);
    Ok(none)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(host: &ReferenceHost, list: ObjRef) -> Vec<i64> {
        host.sequence_items(list)
            .unwrap()
            .into_iter()
            .map(|item| host.as_i64(item).unwrap())
            .collect()
    }

    #[test]
    fn range_forms() {
        let host = ReferenceHost::new();
        let five = host.own(host.new_int(5).unwrap());
        let two = host.own(host.new_int(2).unwrap());
        let minus = host.own(host.new_int(-2).unwrap());

        let list = host.own(range(&host, &[five.get()]).unwrap());
        assert_eq!(ints(&host, list.get()), vec![0, 1, 2, 3, 4]);

        let list = host.own(range(&host, &[two.get(), five.get()]).unwrap());
        assert_eq!(ints(&host, list.get()), vec![2, 3, 4]);

        let list = host.own(range(&host, &[five.get(), two.get(), minus.get()]).unwrap());
        assert_eq!(ints(&host, list.get()), vec![5, 3]);
    }

    #[test]
    fn range_crosses_machine_integer_limit() {
        let host = ReferenceHost::new();
        let start = host.own(host.new_int(i64::MAX - 1).unwrap());
        let stop = host.own(host.new_long(BigInt::from(i64::MAX) + 2));
        let list = host.own(range(&host, &[start.get(), stop.get()]).unwrap());
        let values: Vec<BigInt> = host
            .sequence_items(list.get())
            .unwrap()
            .into_iter()
            .map(|item| host.int_value(item).unwrap())
            .collect();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], BigInt::from(i64::MAX) + 1);
    }

    #[test]
    fn range_rejects_float_and_zero_step() {
        let host = ReferenceHost::new();
        let float = host.own(host.new_float(1.5));
        let err = range(&host, &[float.get()]).unwrap_err();
        assert_eq!(err.message, "range() integer end argument expected, got float.");

        let one = host.own(host.new_int(1).unwrap());
        let zero = host.own(host.new_int(0).unwrap());
        let err = range(&host, &[one.get(), one.get(), zero.get()]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Value);
    }

    #[test]
    fn open_requires_a_name() {
        let host = ReferenceHost::new();
        let err = open(&host, &[]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Type);

        let name = host.own(host.new_str("/nonexistent/shimrt").unwrap());
        let err = open(&host, &[name.get()]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Io);
    }

    #[test]
    fn compile_rejects_indented_eval_source() {
        let host = ReferenceHost::new();
        let source = host.own(host.new_str("  1 + 1").unwrap());
        let file = host.own(host.new_str("<string>").unwrap());
        let mode = host.own(host.new_str("eval").unwrap());
        let err = compile(&host, &[source.get(), file.get(), mode.get()]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Syntax);

        let source = host.own(host.new_str("1 + 1").unwrap());
        let code = host.own(compile(&host, &[source.get(), file.get(), mode.get()]).unwrap());
        assert!(host.is_code(code.get()));
    }

    #[test]
    fn compile_rejects_flags_outside_u32() {
        let host = ReferenceHost::new();
        let source = host.own(host.new_str("x = 1").unwrap());
        let file = host.own(host.new_str("<string>").unwrap());
        let mode = host.own(host.new_str("exec").unwrap());
        let rejected = [-1, i64::from(u32::MAX) + 1].map(|value| host.own(host.new_int(value).unwrap()));
        let baseline = host.live_objects();
        for flags in &rejected {
            let err = compile(&host, &[source.get(), file.get(), mode.get(), flags.get()]).unwrap_err();
            assert_eq!(err.kind, ExceptionKind::Value);
        }
        assert_eq!(host.live_objects(), baseline);

        let flags = host.own(host.new_int(i64::from(u32::MAX)).unwrap());
        let code = host.own(compile(&host, &[source.get(), file.get(), mode.get(), flags.get()]).unwrap());
        assert!(host.is_code(code.get()));
    }
}
