use super::value::Value;

/// Encodes a value into its canonical bencode form.
///
/// Encoding is total over the value model and dictionary keys come out in
/// sorted byte order, so this never fails.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn encode_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(bytes);
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::List(list) => {
            buf.push(b'l');
            for item in list {
                encode_into(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(dict) => {
            buf.push(b'd');
            for (key, item) in dict {
                encode_bytes(key, buf);
                encode_into(item, buf);
            }
            buf.push(b'e');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::decode;
    use super::*;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&Value::Integer(42)), b"i42e");
        assert_eq!(encode(&Value::Integer(-42)), b"i-42e");
        assert_eq!(encode(&Value::bytes(b"spam")), b"4:spam");
        assert_eq!(encode(&Value::bytes(b"")), b"0:");
    }

    #[test]
    fn test_dict_keys_sorted() {
        let value = Value::dict([
            ("y", Value::from("q")),
            ("t", Value::bytes(b"aa")),
            ("a", Value::dict([("id", Value::bytes(b"x"))])),
            ("q", Value::from("ping")),
        ]);
        assert_eq!(
            encode(&value),
            b"d1:ad2:id1:xe1:q4:ping1:t2:aa1:y1:qe".to_vec()
        );
    }

    #[test]
    fn test_round_trip_fixtures() {
        let fixtures = vec![
            Value::Integer(0),
            Value::Integer(i64::MIN),
            Value::Integer(i64::MAX),
            Value::bytes([0u8, 255, b'e', b':', b'd']),
            Value::List(vec![]),
            Value::dict(Vec::<(&str, Value)>::new()),
            Value::List(vec![
                Value::Integer(1),
                Value::bytes(b"two"),
                Value::List(vec![Value::dict([("k", Value::Integer(3))])]),
            ]),
            Value::dict([
                ("m", Value::dict([("ut_metadata", Value::Integer(1))])),
                ("metadata_size", Value::Integer(31_337)),
                ("v", Value::from("spider 0.1")),
            ]),
        ];

        for value in fixtures {
            assert_eq!(decode(&encode(&value)).unwrap(), value);
        }
    }
}
