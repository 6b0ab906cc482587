//! Source-level conventions shared with the scripting layer.

const DERIVATIVE_Y: [&str; 3] = ["dFdy", "dFdyFine", "dFdyCoarse"];

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Negate every vertical derivative in a fragment shader.
///
/// Textures are authored top-down while the target samples bottom-up, so
/// the Y axis of screen space is flipped relative to the authored shader.
/// Each `dFdy(expr)` call becomes `(-dFdy(expr))`. Comments are copied as
/// is, and a call whose argument list never closes is left untouched.
pub fn negate_derivative_y(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 16);
    let mut rest = source;

    while let Some(start) = find_derivative_call(rest) {
        out.push_str(&rest[..start]);
        let call = &rest[start..];
        match call_end(call) {
            Some(end) => {
                out.push_str("(-");
                out.push_str(&call[..end]);
                out.push(')');
                rest = &call[end..];
            }
            None => {
                let name_len = ident_len(call);
                out.push_str(&call[..name_len]);
                rest = &call[name_len..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn ident_len(source: &str) -> usize {
    source.find(|c: char| !is_ident_char(c)).unwrap_or(source.len())
}

/// Start of the first `dFdy`-family call outside a comment.
fn find_derivative_call(source: &str) -> Option<usize> {
    let mut pos = 0;
    while let Some(c) = source[pos..].chars().next() {
        let tail = &source[pos..];
        if tail.starts_with("//") {
            pos += tail.find('\n').map_or(tail.len(), |newline| newline + 1);
        } else if tail.starts_with("/*") {
            pos += tail[2..].find("*/").map_or(tail.len(), |close| close + 4);
        } else if is_ident_char(c) {
            let len = ident_len(tail);
            let is_call = tail[len..].trim_start().starts_with('(');
            if is_call && DERIVATIVE_Y.contains(&&tail[..len]) {
                return Some(pos);
            }
            pos += len;
        } else {
            pos += c.len_utf8();
        }
    }
    None
}

/// Byte index just past the parenthesis closing the first argument list.
fn call_end(call: &str) -> Option<usize> {
    let open = call.find('(')?;
    let mut depth = 0usize;
    for (offset, c) in call[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Map a vertex input name to the attribute name the scripting layer uses.
/// Unknown names pass through unchanged.
pub fn canonical_attribute_name(name: &str) -> &str {
    match name {
        "a_position" => "position",
        "a_normal" => "normal",
        "a_tangent" => "tangent",
        "a_texcoord0" => "uv",
        "a_texcoord1" => "uv2",
        "a_texcoord2" => "uv3",
        "a_texcoord3" => "uv4",
        "a_color0" => "color",
        "a_indices" => "matricesIndices",
        "a_weight" => "matricesWeights",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negates_each_call() {
        assert_eq!(
            negate_derivative_y("float d = a * dFdy(uv.x) - dFdy(uv.y);"),
            "float d = a * (-dFdy(uv.x)) - (-dFdy(uv.y));"
        );
    }

    #[test]
    fn test_nested_arguments() {
        assert_eq!(
            negate_derivative_y("vec2 g = dFdy(max(a, vec2(b)));"),
            "vec2 g = (-dFdy(max(a, vec2(b))));"
        );
        assert_eq!(negate_derivative_y("dFdyFine (p)"), "(-dFdyFine (p))");
    }

    #[test]
    fn test_leaves_other_identifiers() {
        let source = "float x = dFdx(p) + mydFdy(p) + dFdyScale;";
        assert_eq!(negate_derivative_y(source), source);
    }

    #[test]
    fn test_unbalanced_call_kept() {
        assert_eq!(negate_derivative_y("dFdy(p"), "dFdy(p");
    }

    #[test]
    fn test_comments_do_not_hide_later_calls() {
        assert_eq!(
            negate_derivative_y("// uses dFdy( for slope\nfloat s = dFdy(v.y);\n"),
            "// uses dFdy( for slope\nfloat s = (-dFdy(v.y));\n"
        );
        assert_eq!(
            negate_derivative_y("/* dFdy(p) */ float t = dFdyCoarse(p);"),
            "/* dFdy(p) */ float t = (-dFdyCoarse(p));"
        );
    }

    #[test]
    fn test_unbalanced_call_does_not_stop_scan() {
        assert_eq!(negate_derivative_y("dFdy(p + dFdy(q)"), "dFdy(p + (-dFdy(q))");
    }

    #[test]
    fn test_attribute_names() {
        assert_eq!(canonical_attribute_name("a_position"), "position");
        assert_eq!(canonical_attribute_name("a_texcoord1"), "uv2");
        assert_eq!(canonical_attribute_name("a_weight"), "matricesWeights");
        assert_eq!(canonical_attribute_name("instanceColor"), "instanceColor");
    }
}
