//! Request execution against a scripted transport.

use std::time::Duration;

use ewsline_client::{ClientConfig, ServiceClient, ServiceClientBuilder};
use ewsline_protocol::{
    ErrorHandlingMode, ErrorKind, EwsError, Operation, RemoteFaultKind, ServerVersion,
    XmlNamespace,
};
use ewsline_transport_traits::TransportError;
use ewsline_transport_traits::mock::ScriptedTransport;
use pretty_assertions::assert_eq;

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const MESSAGES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/messages";
const TYPES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/types";
const ERRORS_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/errors";

fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_NS}"><s:Header><h:ServerVersionInfo xmlns:h="{TYPES_NS}" MajorVersion="15" MinorVersion="1" MajorBuildNumber="2507" MinorBuildNumber="6" Version="V2017_07_11"/></s:Header><s:Body xmlns:m="{MESSAGES_NS}" xmlns:t="{TYPES_NS}">{body}</s:Body></s:Envelope>"#
    )
}

fn success(id: &str) -> String {
    format!(
        r#"<m:MoveItemResponseMessage ResponseClass="Success"><m:ResponseCode>NoError</m:ResponseCode><m:Items><t:Message><t:ItemId Id="{id}"/></t:Message></m:Items></m:MoveItemResponseMessage>"#
    )
}

fn error(code: &str) -> String {
    format!(
        r#"<m:MoveItemResponseMessage ResponseClass="Error"><m:MessageText>The request failed.</m:MessageText><m:ResponseCode>{code}</m:ResponseCode><m:DescriptiveLinkKey>0</m:DescriptiveLinkKey><m:Items/></m:MoveItemResponseMessage>"#
    )
}

fn batch(messages: &[String]) -> String {
    envelope(&format!(
        "<m:MoveItemResponse><m:ResponseMessages>{}</m:ResponseMessages></m:MoveItemResponse>",
        messages.concat()
    ))
}

fn fault(code: &str, message: &str, extra_detail: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_NS}"><s:Body><s:Fault><faultcode xmlns:a="{TYPES_NS}">a:{code}</faultcode><faultstring xml:lang="en-US">{message}</faultstring><detail><e:ResponseCode xmlns:e="{ERRORS_NS}">{code}</e:ResponseCode><e:Message xmlns:e="{ERRORS_NS}">{message}</e:Message>{extra_detail}</detail></s:Fault></s:Body></s:Envelope>"#
    )
}

/// `MoveItem` for a list of item ids; each message yields the moved item id.
fn move_items(ids: &[&str], mode: ErrorHandlingMode) -> Operation<Option<String>> {
    let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
    Operation::builder("MoveItem")
        .expected_count(ids.len())
        .error_mode(mode)
        .validate(|_| Ok(()))
        .write_body(move |w| {
            w.write_start_element(XmlNamespace::Messages, "ToFolderId")?;
            w.write_start_element(XmlNamespace::Types, "DistinguishedFolderId")?;
            w.write_attribute("Id", "archive".to_string())?;
            w.write_end_element()?;
            w.write_end_element()?;
            w.write_start_element(XmlNamespace::Messages, "ItemIds")?;
            for id in &ids {
                w.write_start_element(XmlNamespace::Types, "ItemId")?;
                w.write_attribute("Id", id.clone())?;
                w.write_end_element()?;
            }
            w.write_end_element()?;
            Ok(())
        })
        .parse_message(|reader, _| {
            if !reader.is_start_element(XmlNamespace::Messages, "Items") {
                return Ok(None);
            }
            reader.read_start_element(XmlNamespace::Messages, "Items")?;
            let mut id = None;
            while !reader.at_end_of_element() {
                reader.read_any_start_element()?;
                if reader.is_start_element(XmlNamespace::Types, "ItemId") {
                    reader.read_start_element(XmlNamespace::Types, "ItemId")?;
                    id = Some(reader.read_attribute::<String>("Id")?);
                    reader.skip_current_element()?;
                }
                reader.skip_to_end_of_element()?;
                reader.read_current_end()?;
            }
            reader.read_end_element(XmlNamespace::Messages, "Items")?;
            Ok(id)
        })
        .build()
        .unwrap()
}

fn client(transport: &ScriptedTransport) -> ServiceClient<ScriptedTransport> {
    ServiceClient::new(transport.clone(), ClientConfig::default())
}

#[tokio::test]
async fn test_version_gate_fails_without_network_call() {
    let transport = ScriptedTransport::new();
    let client = ServiceClientBuilder::new()
        .with_server_version(ServerVersion::Exchange2010)
        .build(transport.clone())
        .unwrap();
    let op = ewsline_protocol::get_streaming_events_operation(["s1"], 10).unwrap();

    let err = client.execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Version);
    match err {
        EwsError::VersionTooOld {
            required,
            requested,
            ..
        } => {
            assert_eq!(required, ServerVersion::Exchange2010_SP1);
            assert_eq!(requested, ServerVersion::Exchange2010);
        }
        other => panic!("expected a version error, got {other:?}"),
    }
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn test_validation_fails_without_network_call() {
    let transport = ScriptedTransport::new();
    let op = Operation::<()>::builder("DeleteItem")
        .validate(|_| Err(EwsError::validation("DeleteType is required")))
        .write_body(|_| Ok(()))
        .parse_message(|_, _| Ok(()))
        .build()
        .unwrap();

    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!err.is_retryable());
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn test_full_batch_is_returned() {
    let transport = ScriptedTransport::new();
    transport.push_response(
        200,
        batch(&[success("n1"), error("ErrorItemNotFound"), success("n3")]),
    );

    let op = move_items(&["a", "b", "c"], ErrorHandlingMode::ReturnErrors);
    let messages = client(&transport).execute(&op).await.unwrap();

    assert_eq!(messages.len(), 3);
    let payloads: Vec<Option<String>> = messages.iter().map(|m| m.payload.clone()).collect();
    assert_eq!(payloads, vec![Some("n1".into()), None, Some("n3".into())]);
    let errors: Vec<(usize, String)> = messages
        .errors()
        .map(|(index, err)| (index, err.response_code))
        .collect();
    assert_eq!(errors, vec![(1, "ErrorItemNotFound".to_string())]);
}

#[tokio::test]
async fn test_request_envelope_and_headers() {
    let transport = ScriptedTransport::new();
    transport.push_response(200, batch(&[success("n1")]));
    let client = ServiceClientBuilder::new()
        .with_culture("en-US")
        .with_http_header("X-AnchorMailbox", "alice@example.com")
        .build(transport.clone())
        .unwrap();

    client
        .execute(&move_items(&["a"], ErrorHandlingMode::ThrowOnError))
        .await
        .unwrap();

    let body = transport.last_body().unwrap();
    assert!(body.contains(r#"Version="Exchange2013_SP1""#));
    assert!(body.contains("<m:MoveItem"));
    assert!(body.contains(r#"<t:ItemId Id="a""#));
    assert!(body.contains("en-US"));

    let request = &transport.requests()[0];
    let names: Vec<&str> = request.headers.iter().map(|(name, _)| name.as_str()).collect();
    assert!(names.contains(&"client-request-id"));
    assert!(names.contains(&"return-client-request-id"));
    assert!(names.contains(&"X-AnchorMailbox"));
}

#[tokio::test]
async fn test_single_error_for_whole_batch_is_raised() {
    let transport = ScriptedTransport::new();
    transport.push_response(200, batch(&[error("ErrorMoveCopyFailed")]));

    let op = move_items(&["a", "b", "c"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Response);
    assert_eq!(err.response_code(), Some("ErrorMoveCopyFailed"));
}

#[tokio::test]
async fn test_short_batch_with_several_messages_is_fatal() {
    let transport = ScriptedTransport::new();
    transport.push_response(
        200,
        batch(&[error("ErrorMoveCopyFailed"), error("ErrorMoveCopyFailed")]),
    );

    let op = move_items(&["a", "b", "c"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deserialization);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_short_batch_with_single_success_is_fatal() {
    let transport = ScriptedTransport::new();
    transport.push_response(200, batch(&[success("n1")]));

    let op = move_items(&["a", "b"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deserialization);
}

#[tokio::test]
async fn test_throw_on_error_raises_the_message_error() {
    let transport = ScriptedTransport::new();
    transport.push_response(200, batch(&[error("ErrorAccessDenied")]));

    let op = move_items(&["a"], ErrorHandlingMode::ThrowOnError);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.response_code(), Some("ErrorAccessDenied"));

    transport.push_response(200, batch(&[error("ErrorAccessDenied")]));
    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);
    let messages = client(&transport).execute(&op).await.unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_server_info_is_recorded() {
    let transport = ScriptedTransport::new();
    transport.push_response(200, batch(&[success("n1")]));
    let client = client(&transport);
    assert!(client.server_info().is_none());

    client
        .execute(&move_items(&["a"], ErrorHandlingMode::ReturnErrors))
        .await
        .unwrap();

    let info = client.server_info().unwrap();
    assert_eq!(info.major_version, Some(15));
    assert_eq!(info.major_build_number, Some(2507));
    assert_eq!(info.version.as_deref(), Some("V2017_07_11"));
}

#[tokio::test]
async fn test_invalid_server_version_fault() {
    let transport = ScriptedTransport::new();
    transport.push_response(
        500,
        fault(
            "ErrorInvalidServerVersion",
            "The specified server version is invalid.",
            "",
        ),
    );

    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Version);
    assert!(matches!(err, EwsError::ServerVersionMismatch { .. }));
}

#[tokio::test]
async fn test_schema_validation_fault_depends_on_requested_version() {
    let body = fault(
        "ErrorSchemaValidation",
        "The request failed schema validation.",
        "<e:LineNumber xmlns:e=\"http://schemas.microsoft.com/exchange/services/2006/errors\">3</e:LineNumber><e:LinePosition xmlns:e=\"http://schemas.microsoft.com/exchange/services/2006/errors\">17</e:LinePosition>",
    );
    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);

    let transport = ScriptedTransport::new();
    transport.push_response(500, body.clone());
    let oldest = ServiceClientBuilder::new()
        .with_server_version(ServerVersion::Exchange2007_SP1)
        .build(transport.clone())
        .unwrap();
    let err = oldest.execute(&op).await.unwrap_err();
    assert!(matches!(err, EwsError::ServerVersionMismatch { .. }));

    transport.push_response(500, body);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFault);
    match err {
        EwsError::RemoteFault(fault) => assert_eq!(
            fault.kind,
            RemoteFaultKind::SchemaValidation {
                line: Some(3),
                position: Some(17),
            }
        ),
        other => panic!("expected a remote fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_busy_fault_carries_back_off() {
    let transport = ScriptedTransport::new();
    transport.push_response(
        500,
        fault(
            "ErrorServerBusy",
            "The server cannot service this request right now.",
            &format!(
                r#"<t:MessageXml xmlns:t="{TYPES_NS}"><t:Value Name="BackOffMilliseconds">2500</t:Value></t:MessageXml>"#
            ),
        ),
    );

    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.back_off(), Some(Duration::from_millis(2500)));
    assert_eq!(err.response_code(), Some("ErrorServerBusy"));
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn test_undecodable_fault_is_opaque() {
    let transport = ScriptedTransport::new();
    transport.push_response(500, "<html><body>Internal Server Error</body>");

    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    match err {
        EwsError::RemoteFault(fault) => {
            assert_eq!(fault.kind, RemoteFaultKind::Opaque { status: 500 });
            assert!(fault.fault.is_none());
        }
        other => panic!("expected an opaque fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_failure_is_retryable_transport_error() {
    let transport = ScriptedTransport::new();
    transport.push_error(TransportError::ConnectionFailed("refused".into()));

    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_success_body_is_fatal() {
    let transport = ScriptedTransport::new();
    transport.push_response(200, envelope("<m:MoveItemResponse><m:ResponseMessages>"));

    let op = move_items(&["a"], ErrorHandlingMode::ReturnErrors);
    let err = client(&transport).execute(&op).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deserialization);
}
