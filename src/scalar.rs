//! `chr`, `ord` and `len`.

use shimrt_core::{Host, HostError, ObjRef, Owned, TextProbe};

use crate::error::{ShimError, ShimResult};

/// Read an operand as a machine integer, converting it first if it is not
/// already integral.
pub(crate) fn as_machine_int<H: Host>(host: &H, value: ObjRef) -> ShimResult<i64> {
    if host.is_integral(value) {
        return Ok(host.as_i64(value)?);
    }
    match host.integer_slot(value) {
        Some(converted) => {
            let converted = host.own(converted?);
            Ok(host.as_i64(converted.get())?)
        }
        None => Err(ShimError::type_error("an integer is required")),
    }
}

/// The one-byte string for a character code in `[0, 256)`.
pub fn chr<H: Host>(host: &H, value: ObjRef) -> ShimResult<Owned<'_, H>> {
    let code = as_machine_int(host, value)?;
    let byte =
        u8::try_from(code).map_err(|_| ShimError::value("chr() arg not in range(256)"))?;
    Ok(host.own(host.new_bytes(&[byte])?))
}

/// The code of a single character.
///
/// Accepts byte strings, byte arrays and unicode text of length one.
pub fn ord<H: Host>(host: &H, value: ObjRef) -> ShimResult<Owned<'_, H>> {
    match host.text_probe(value) {
        Some(TextProbe {
            len: 1,
            first: Some(code),
            ..
        }) => Ok(host.own(host.new_int(i64::from(code))?)),
        Some(probe) => Err(ShimError::type_error(format!(
            "ord() expected a character, but {} of length {} found",
            probe.kind.describe(),
            probe.len
        ))),
        None => Err(ShimError::type_error(format!(
            "ord() expected string of length 1, but {} found",
            host.type_name_of(value)
        ))),
    }
}

/// The host size of `value` as a new integer.
pub fn len<H: Host>(host: &H, value: ObjRef) -> ShimResult<Owned<'_, H>> {
    let size = host.size(value)?;
    let size = i64::try_from(size).map_err(|_| HostError::overflow("object size too large"))?;
    Ok(host.own(host.new_int(size)?))
}
