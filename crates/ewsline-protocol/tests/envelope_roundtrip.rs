//! Request envelopes written by the codec and response envelopes read back.

use ewsline_protocol::xml::{XmlDocumentReader, XmlReader, XmlWriter};
use ewsline_protocol::{
    EnvelopeBody, EnvelopeHeaders, ErrorHandlingMode, ErrorKind, EwsResult, Operation,
    RequestEnvelope, ResponseDecoder, ResponseEnvelope, ServerVersion, XmlNamespace,
};
use pretty_assertions::assert_eq;

/// Answers a request the way a server would: echo the requested version in
/// `t:ServerVersionInfo` and return one message per requested id.
fn respond(request: &[u8]) -> EwsResult<Vec<u8>> {
    let mut reader = XmlReader::parse(request)?;
    reader.read_start_element(XmlNamespace::Soap, "Envelope")?;
    reader.read_start_element(XmlNamespace::Soap, "Header")?;
    reader.read_start_element(XmlNamespace::Types, "RequestServerVersion")?;
    let version: ServerVersion = reader.read_attribute("Version")?;
    reader.skip_current_element()?;
    reader.skip_to_end_of_element()?;
    reader.read_end_element(XmlNamespace::Soap, "Header")?;
    reader.read_start_element(XmlNamespace::Soap, "Body")?;
    let operation = reader.read_any_start_element()?.local_name;
    let mut ids = Vec::new();
    while !reader.at_end_of_element() {
        ids.push(reader.read_element_value::<String>(XmlNamespace::Types, "ItemId")?);
    }

    let mut w = XmlWriter::new();
    w.write_declaration()?;
    w.write_start_element(XmlNamespace::Soap, "Envelope")?;
    w.write_namespace_declarations(&[
        XmlNamespace::Soap,
        XmlNamespace::Types,
        XmlNamespace::Messages,
    ])?;
    w.write_start_element(XmlNamespace::Soap, "Header")?;
    w.write_start_element(XmlNamespace::Types, "ServerVersionInfo")?;
    w.write_attribute("MajorVersion", 15u32)?;
    w.write_attribute("MinorVersion", 1u32)?;
    w.write_attribute("Version", version)?;
    w.write_end_element()?;
    w.write_end_element()?;
    w.write_start_element(XmlNamespace::Soap, "Body")?;
    w.write_start_element(XmlNamespace::Messages, &format!("{operation}Response"))?;
    w.write_start_element(XmlNamespace::Messages, "ResponseMessages")?;
    for id in ids {
        w.write_start_element(XmlNamespace::Messages, &format!("{operation}ResponseMessage"))?;
        w.write_attribute("ResponseClass", "Success".to_string())?;
        w.write_element_value(XmlNamespace::Messages, "ResponseCode", "NoError".to_string())?;
        w.write_element_value(XmlNamespace::Messages, "Echo", id)?;
        w.write_end_element()?;
    }
    w.write_end_element()?;
    w.write_end_element()?;
    w.write_end_element()?;
    w.write_end_element()?;
    Ok(w.into_inner()?)
}

fn echo_operation(ids: Vec<String>) -> Operation<String> {
    let expected = ids.len();
    Operation::builder("GetItem")
        .expected_count(expected)
        .error_mode(ErrorHandlingMode::ReturnErrors)
        .write_body(move |w| {
            for id in &ids {
                w.write_element_value(XmlNamespace::Types, "ItemId", id.clone())?;
            }
            Ok(())
        })
        .parse_message(|reader, _| {
            Ok(reader.read_element_value::<String>(XmlNamespace::Messages, "Echo")?)
        })
        .build()
        .unwrap()
}

#[test]
fn test_request_round_trips_through_decoder() {
    let op = echo_operation(vec!["a".into(), "b".into(), "c".into()]);
    let headers = EnvelopeHeaders::new(ServerVersion::Exchange2010_SP2);
    let request =
        RequestEnvelope::build(&headers, op.spec().name(), |w| op.spec().write_body(w)).unwrap();

    let response = respond(&request).unwrap();
    let envelope = ResponseEnvelope::parse(&response).unwrap();

    let info = envelope.server_info.clone().unwrap();
    assert_eq!(info.server_version(), Some(ServerVersion::Exchange2010_SP2));
    assert_eq!(info.major_version, Some(15));

    let EnvelopeBody::Content(mut reader) = envelope.body else {
        panic!("expected a success body");
    };
    let payloads = ResponseDecoder::decode_batch(&mut reader, &op)
        .unwrap()
        .into_payloads()
        .unwrap();
    assert_eq!(payloads, vec!["a", "b", "c"]);
}

#[test]
fn test_count_mismatch_against_wrong_expectation() {
    let writer_op = echo_operation(vec!["a".into(), "b".into()]);
    let headers = EnvelopeHeaders::default();
    let request = RequestEnvelope::build(&headers, writer_op.spec().name(), |w| {
        writer_op.spec().write_body(w)
    })
    .unwrap();
    let response = respond(&request).unwrap();

    // Three expected, two successes returned
    let reading_op = echo_operation(vec!["a".into(), "b".into(), "c".into()]);
    let EnvelopeBody::Content(mut reader) = ResponseEnvelope::parse(&response).unwrap().body else {
        panic!("expected a success body");
    };
    let err = ResponseDecoder::decode_batch(&mut reader, &reading_op).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deserialization);
}

#[tokio::test]
async fn test_documents_framed_from_one_stream() {
    let op = echo_operation(vec!["x".into()]);
    let request =
        RequestEnvelope::build(&EnvelopeHeaders::default(), "GetItem", |w| op.spec().write_body(w))
            .unwrap();
    let one = respond(&request).unwrap();

    // A streamed body carries several envelopes back to back
    let mut stream = Vec::new();
    stream.extend_from_slice(&one);
    stream.extend_from_slice(b"\r\n");
    stream.extend_from_slice(&one);

    let mut documents = XmlDocumentReader::new(stream.as_slice());
    let mut seen = 0;
    while let Some(document) = documents.next_document().await.unwrap() {
        let envelope = ResponseEnvelope::read(document).unwrap();
        let EnvelopeBody::Content(mut reader) = envelope.body else {
            panic!("expected a success body");
        };
        let collection = ResponseDecoder::decode_batch(&mut reader, &op).unwrap();
        assert_eq!(collection[0].payload, "x");
        seen += 1;
    }
    assert_eq!(seen, 2);
}
