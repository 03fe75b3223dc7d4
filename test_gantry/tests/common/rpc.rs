use gantry::{
    Broker, BrokerQueue, Contract, Dispatch, JsonSerializer, MemoryBroker, Node, Operation,
    QueueSpec, RpcHeader, RpcRequest, RpcResponse, RpcSerializer, ServiceAddress, HEADER_RPC,
    SERIALIZER_JSON,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The address every RPC test service listens on.
pub fn calc_address() -> ServiceAddress {
    ServiceAddress::new("calc", "requests")
}

/// A plain two-argument addition contract.
pub fn add_contract() -> Contract {
    Contract::builder("ICalc")
        .operation(
            Operation::builder("Add")
                .param("a", "int")
                .param("b", "int")
                .returns("int")
                .handler(|arguments| async move {
                    let a = arguments.get("a").and_then(Value::as_i64).unwrap_or_default();
                    let b = arguments.get("b").and_then(Value::as_i64).unwrap_or_default();

                    Ok(json!(a + b))
                }),
        )
        .build()
}

/// Declares a plain reply queue with the given name.
pub async fn reply_queue(broker: &Arc<MemoryBroker>, name: &str) -> Arc<dyn BrokerQueue> {
    broker
        .declare_queue(QueueSpec::plain(name))
        .await
        .expect("a plain queue always declares")
}

/// Publishes a well-formed JSON RPC request to the given service address.
pub async fn send_request(
    broker: &Arc<MemoryBroker>,
    address: &ServiceAddress,
    request: &RpcRequest,
    id: Uuid,
    reply_to: &str,
) {
    let body = JsonSerializer
        .write_request(request)
        .expect("a request always encodes");

    send_raw(
        broker,
        address,
        Some(id),
        Some(reply_to),
        &RpcHeader::single(SERIALIZER_JSON).to_string(),
        body,
    )
    .await;
}

/// Publishes a message with an arbitrary RPC header line and body, optionally
/// without a correlation ID or reply address.
pub async fn send_raw(
    broker: &Arc<MemoryBroker>,
    address: &ServiceAddress,
    id: Option<Uuid>,
    reply_to: Option<&str>,
    header_line: &str,
    body: Vec<u8>,
) {
    let mut dispatch = Dispatch::builder()
        .exchange(address.namespace())
        .routing_key(address.routing_key())
        .header(HEADER_RPC, header_line.as_bytes())
        .body(body);

    if let Some(id) = id {
        dispatch = dispatch.correlation_id(id);
    }
    if let Some(reply_to) = reply_to {
        dispatch = dispatch.reply_to(reply_to);
    }

    broker
        .publish(dispatch.build())
        .await
        .expect("publishing to a declared exchange succeeds");
}

/// Receives one reply within a generous deadline and decodes it.
pub async fn receive_reply(replies: &Arc<dyn BrokerQueue>) -> (Option<Uuid>, RpcResponse) {
    let message = replies
        .receive_timeout(Duration::from_secs(5))
        .await
        .expect("a reply arrives in time");
    let response = JsonSerializer
        .read_response(message.body())
        .expect("a reply body decodes");

    (message.correlation_id(), response)
}

/// Boots a node on the given broker.
pub fn node_on(broker: &Arc<MemoryBroker>) -> Node {
    Node::new("test-node", Arc::clone(broker) as Arc<dyn Broker>)
}
