//! SOAP response bodies as the metadata API sends them.

use metasync_protocol::{escape, ExecuteAnonymousResult, MetadataItem, SOAP_ENVELOPE_NS};

/// Wraps header and body fragments in a SOAP envelope.
pub fn envelope(header: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soapenv:Envelope xmlns:soapenv=\"{}\">\
         <soapenv:Header>{}</soapenv:Header>\
         <soapenv:Body>{}</soapenv:Body>\
         </soapenv:Envelope>",
        SOAP_ENVELOPE_NS, header, body
    )
}

/// A SOAP fault.
pub fn fault(code: &str, message: &str) -> String {
    envelope(
        "",
        &format!(
            "<soapenv:Fault><faultcode>{}</faultcode><faultstring>{}</faultstring></soapenv:Fault>",
            escape(code),
            escape(message)
        ),
    )
}

/// A successful login.
pub fn login(session_id: &str, metadata_server_url: &str) -> String {
    envelope(
        "",
        &format!(
            "<loginResponse><result>\
             <metadataServerUrl>{}</metadataServerUrl>\
             <passwordExpired>false</passwordExpired>\
             <sessionId>{}</sessionId>\
             </result></loginResponse>",
            escape(metadata_server_url),
            escape(session_id)
        ),
    )
}

/// An accepted export request.
pub fn retrieve(job_id: &str) -> String {
    envelope(
        "",
        &format!(
            "<retrieveResponse><result><done>false</done><id>{}</id><state>Queued</state></result></retrieveResponse>",
            escape(job_id)
        ),
    )
}

/// A completed export.
pub fn retrieve_ready(job_id: &str, zip_file: &str) -> String {
    envelope(
        "",
        &format!(
            "<checkRetrieveStatusResponse><result>\
             <id>{}</id>\
             <zipFile>{}</zipFile>\
             </result></checkRetrieveStatusResponse>",
            escape(job_id),
            zip_file
        ),
    )
}

/// The result of an anonymous script run, with its debug log in the header.
pub fn execute_anonymous(result: &ExecuteAnonymousResult) -> String {
    let header = result
        .debug_log
        .as_deref()
        .map(|log| {
            format!(
                "<DebuggingInfo><debugLog>{}</debugLog></DebuggingInfo>",
                escape(log)
            )
        })
        .unwrap_or_default();

    let mut body = format!("<compiled>{}</compiled>", result.compiled);
    if let Some(problem) = &result.compile_problem {
        body.push_str(&format!("<compileProblem>{}</compileProblem>", escape(problem)));
    }
    if let Some(message) = &result.exception_message {
        body.push_str(&format!("<exceptionMessage>{}</exceptionMessage>", escape(message)));
    }
    if let Some(success) = result.success {
        body.push_str(&format!("<success>{}</success>", success));
    }

    envelope(
        &header,
        &format!("<executeAnonymousResponse><result>{}</result></executeAnonymousResponse>", body),
    )
}

/// A metadata listing.
pub fn list_metadata(items: &[MetadataItem]) -> String {
    let results: String = items
        .iter()
        .map(|item| {
            format!(
                "<result>\
                 <createdDate>{}</createdDate>\
                 <fileName>{}</fileName>\
                 <id>{}</id>\
                 <lastModifiedDate>{}</lastModifiedDate>\
                 </result>",
                item.created_date.to_rfc3339(),
                escape(&item.file_name),
                escape(&item.id),
                item.last_modified_date.to_rfc3339()
            )
        })
        .collect();
    envelope("", &format!("<listMetadataResponse>{}</listMetadataResponse>", results))
}
