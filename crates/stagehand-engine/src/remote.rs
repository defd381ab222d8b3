use std::net::TcpStream;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect as websocket_connect, Message as WsMessage, WebSocket};
use uuid::Uuid;

/// The single operation every remote collaborator exposes: issue one
/// named request with an optional payload, get the response data back.
pub trait RemoteCall {
    fn call(
        &mut self,
        request_type: &str,
        request_data: Option<Map<String, Value>>,
    ) -> Result<Value>;
}

/// Blocking session with the production app's control socket.
///
/// The connection lives for one top-level command: opened before the
/// first request, closed when the client drops, on every exit path.
pub struct ObsClient {
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl ObsClient {
    /// Connect and complete the protocol handshake. `password` is only
    /// consulted when the server requests authentication.
    pub fn connect(url: &str, password: Option<&str>) -> Result<Self> {
        let request = url
            .into_client_request()
            .with_context(|| format!("invalid control socket url {url}"))?;
        let (ws, _) = websocket_connect(request)
            .with_context(|| format!("failed to connect control socket {url}"))?;
        let mut client = Self { ws };
        client.identify(password)?;
        Ok(client)
    }

    fn identify(&mut self, password: Option<&str>) -> Result<()> {
        let hello = self.read_envelope()?;
        if hello.get("op").and_then(Value::as_i64) != Some(0) {
            bail!("control socket did not open with a hello frame");
        }
        let hello_data = hello.get("d").and_then(Value::as_object);

        let mut identify = Map::new();
        identify.insert("rpcVersion".to_string(), json!(1));
        if let Some(auth) = hello_data
            .and_then(|data| data.get("authentication"))
            .and_then(Value::as_object)
        {
            let Some(password) = password.filter(|value| !value.is_empty()) else {
                bail!("control socket requires a password and none was provided");
            };
            let challenge = auth
                .get("challenge")
                .and_then(Value::as_str)
                .context("authentication offer lacks a challenge")?;
            let salt = auth
                .get("salt")
                .and_then(Value::as_str)
                .context("authentication offer lacks a salt")?;
            identify.insert(
                "authentication".to_string(),
                Value::String(auth_challenge_response(password, salt, challenge)),
            );
        }

        self.send_envelope(1, Value::Object(identify))?;

        let identified = self.read_envelope()?;
        match identified.get("op").and_then(Value::as_i64) {
            Some(2) => Ok(()),
            _ => bail!("control socket rejected identification"),
        }
    }

    fn send_envelope(&mut self, op: i64, data: Value) -> Result<()> {
        let raw = serde_json::to_string(&json!({"op": op, "d": data}))
            .context("failed to serialize control payload")?;
        self.ws
            .send(WsMessage::Text(raw.into()))
            .context("failed to send control payload")
    }

    /// Next JSON frame from the socket. Non-JSON frames and ping/pong
    /// traffic are skipped.
    fn read_envelope(&mut self) -> Result<Value> {
        loop {
            let message = self.ws.read().context("control socket read failed")?;
            let raw = match message {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => bail!("control socket closed"),
                _ => continue,
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => return Ok(value),
                Err(_) => continue,
            }
        }
    }
}

impl RemoteCall for ObsClient {
    fn call(
        &mut self,
        request_type: &str,
        request_data: Option<Map<String, Value>>,
    ) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let mut request = Map::new();
        request.insert(
            "requestType".to_string(),
            Value::String(request_type.to_string()),
        );
        request.insert("requestId".to_string(), Value::String(request_id.clone()));
        if let Some(data) = request_data {
            request.insert("requestData".to_string(), Value::Object(data));
        }
        self.send_envelope(6, Value::Object(request))?;

        // Event frames for unrelated activity can interleave with the
        // response; skip everything until the matching request id.
        loop {
            let envelope = self.read_envelope()?;
            if envelope.get("op").and_then(Value::as_i64) != Some(7) {
                continue;
            }
            let Some(data) = envelope.get("d").and_then(Value::as_object) else {
                continue;
            };
            if data.get("requestId").and_then(Value::as_str) != Some(request_id.as_str()) {
                continue;
            }

            let status = data
                .get("requestStatus")
                .and_then(Value::as_object)
                .with_context(|| format!("{request_type} response lacks a status"))?;
            if status.get("result").and_then(Value::as_bool) != Some(true) {
                let code = status.get("code").and_then(Value::as_i64).unwrap_or(0);
                let comment = status
                    .get("comment")
                    .and_then(Value::as_str)
                    .unwrap_or("no detail");
                bail!("{request_type} failed ({code}): {comment}");
            }
            return Ok(data
                .get("responseData")
                .cloned()
                .unwrap_or(Value::Object(Map::new())));
        }
    }
}

impl Drop for ObsClient {
    fn drop(&mut self) {
        let _ = self.ws.close(None);
    }
}

/// Challenge response for an authenticated handshake:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
fn auth_challenge_response(password: &str, salt: &str, challenge: &str) -> String {
    let mut secret_hash = Sha256::new();
    secret_hash.update(password.as_bytes());
    secret_hash.update(salt.as_bytes());
    let secret = BASE64.encode(secret_hash.finalize());

    let mut response_hash = Sha256::new();
    response_hash.update(secret.as_bytes());
    response_hash.update(challenge.as_bytes());
    BASE64.encode(response_hash.finalize())
}


#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeMap, BTreeSet};

    use anyhow::{bail, Result};
    use serde_json::{json, Map, Value};

    use super::RemoteCall;

    #[derive(Debug, Clone)]
    pub struct FakeInput {
        pub kind: String,
        pub settings: Map<String, Value>,
    }

    /// In-memory stand-in for the production app. Serves the query
    /// vocabulary from its fields, applies mutations to them, and
    /// records every call so tests can assert on order and count.
    #[derive(Debug, Default)]
    pub struct FakeRemote {
        pub scenes: Vec<String>,
        pub current_scene: String,
        pub items: BTreeMap<String, Vec<(i64, String)>>,
        pub inputs: BTreeMap<String, FakeInput>,
        pub kinds: Vec<String>,
        pub canvas: (u32, u32),
        pub property_items: BTreeMap<String, Vec<(String, String)>>,
        pub filters: BTreeMap<String, Vec<(String, String, Map<String, Value>)>>,
        pub stream_active: bool,
        pub record_active: bool,
        pub fail_types: BTreeSet<String>,
        pub calls: Vec<(String, Option<Map<String, Value>>)>,
        next_item_id: i64,
    }

    impl FakeRemote {
        pub fn new() -> Self {
            Self {
                scenes: vec!["Main".to_string()],
                current_scene: "Main".to_string(),
                items: BTreeMap::from([("Main".to_string(), Vec::new())]),
                canvas: (1920, 1080),
                next_item_id: 1,
                ..Self::default()
            }
        }

        pub fn add_input(&mut self, name: &str, kind: &str, settings: Map<String, Value>) {
            self.inputs.insert(
                name.to_string(),
                FakeInput {
                    kind: kind.to_string(),
                    settings,
                },
            );
        }

        pub fn place_in_scene(&mut self, scene: &str, source: &str) {
            self.place(scene, source);
        }

        pub fn fail_on(&mut self, request_type: &str) {
            self.fail_types.insert(request_type.to_string());
        }

        pub fn calls_of_type(&self, request_type: &str) -> usize {
            self.calls
                .iter()
                .filter(|(kind, _)| kind == request_type)
                .count()
        }

        fn str_arg(data: Option<&Map<String, Value>>, key: &str) -> Result<String> {
            data.and_then(|map| map.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("missing {key}"))
        }

        fn place(&mut self, scene: &str, source: &str) -> i64 {
            let id = self.next_item_id;
            self.next_item_id += 1;
            self.items
                .entry(scene.to_string())
                .or_default()
                .push((id, source.to_string()));
            id
        }
    }

    impl RemoteCall for FakeRemote {
        fn call(
            &mut self,
            request_type: &str,
            request_data: Option<Map<String, Value>>,
        ) -> Result<Value> {
            self.calls
                .push((request_type.to_string(), request_data.clone()));
            if self.fail_types.contains(request_type) {
                bail!("{request_type} failed (injected)");
            }
            let data = request_data.as_ref();

            match request_type {
                "GetSceneList" => Ok(json!({
                    "scenes": self
                        .scenes
                        .iter()
                        .map(|name| json!({"sceneName": name}))
                        .collect::<Vec<Value>>(),
                    "currentProgramSceneName": self.current_scene,
                })),
                "GetInputList" => Ok(json!({
                    "inputs": self
                        .inputs
                        .iter()
                        .map(|(name, input)| json!({"inputName": name, "inputKind": input.kind}))
                        .collect::<Vec<Value>>(),
                })),
                "GetSceneItemList" => {
                    let scene = Self::str_arg(data, "sceneName")?;
                    let Some(items) = self.items.get(&scene) else {
                        bail!("GetSceneItemList failed (600): no scene named {scene}");
                    };
                    Ok(json!({
                        "sceneItems": items
                            .iter()
                            .map(|(id, source)| {
                                json!({"sceneItemId": id, "sourceName": source})
                            })
                            .collect::<Vec<Value>>(),
                    }))
                }
                "GetInputSettings" => {
                    let name = Self::str_arg(data, "inputName")?;
                    let Some(input) = self.inputs.get(&name) else {
                        bail!("GetInputSettings failed (600): no input named {name}");
                    };
                    Ok(json!({
                        "inputSettings": input.settings,
                        "inputKind": input.kind,
                    }))
                }
                "GetVideoSettings" => Ok(json!({
                    "baseWidth": self.canvas.0,
                    "baseHeight": self.canvas.1,
                    "outputWidth": self.canvas.0,
                    "outputHeight": self.canvas.1,
                })),
                "GetInputKindList" => Ok(json!({"inputKinds": self.kinds})),
                "GetStreamStatus" => Ok(json!({"outputActive": self.stream_active})),
                "GetRecordStatus" => Ok(json!({"outputActive": self.record_active})),
                "GetInputPropertiesListPropertyItems" => {
                    let name = Self::str_arg(data, "inputName")?;
                    if !self.inputs.contains_key(&name) {
                        bail!("GetInputPropertiesListPropertyItems failed (600): no input named {name}");
                    }
                    let property = Self::str_arg(data, "propertyName")?;
                    let items = self
                        .property_items
                        .get(&property)
                        .cloned()
                        .unwrap_or_default();
                    Ok(json!({
                        "propertyItems": items
                            .iter()
                            .map(|(display, value)| {
                                json!({
                                    "itemName": display,
                                    "itemValue": value,
                                    "itemEnabled": true,
                                })
                            })
                            .collect::<Vec<Value>>(),
                    }))
                }
                "CreateInput" => {
                    let scene = Self::str_arg(data, "sceneName")?;
                    let name = Self::str_arg(data, "inputName")?;
                    let kind = Self::str_arg(data, "inputKind")?;
                    if self.inputs.contains_key(&name) || self.scenes.contains(&name) {
                        bail!("CreateInput failed (601): an object named {name} already exists");
                    }
                    if !self.scenes.contains(&scene) {
                        bail!("CreateInput failed (600): no scene named {scene}");
                    }
                    let settings = data
                        .and_then(|map| map.get("inputSettings"))
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    self.inputs.insert(name.clone(), FakeInput { kind, settings });
                    let id = self.place(&scene, &name);
                    Ok(json!({"sceneItemId": id}))
                }
                "CreateSceneItem" => {
                    let scene = Self::str_arg(data, "sceneName")?;
                    let source = Self::str_arg(data, "sourceName")?;
                    if !self.scenes.contains(&scene) {
                        bail!("CreateSceneItem failed (600): no scene named {scene}");
                    }
                    if !self.inputs.contains_key(&source) && !self.scenes.contains(&source) {
                        bail!("CreateSceneItem failed (600): no source named {source}");
                    }
                    let id = self.place(&scene, &source);
                    Ok(json!({"sceneItemId": id}))
                }
                "SetSceneItemTransform" => {
                    let scene = Self::str_arg(data, "sceneName")?;
                    let id = data
                        .and_then(|map| map.get("sceneItemId"))
                        .and_then(Value::as_i64)
                        .ok_or_else(|| anyhow::anyhow!("missing sceneItemId"))?;
                    let known = self
                        .items
                        .get(&scene)
                        .map(|items| items.iter().any(|(item_id, _)| *item_id == id))
                        .unwrap_or(false);
                    if !known {
                        bail!("SetSceneItemTransform failed (600): no item {id} in {scene}");
                    }
                    Ok(json!({}))
                }
                "SetInputSettings" => {
                    let name = Self::str_arg(data, "inputName")?;
                    let Some(input) = self.inputs.get_mut(&name) else {
                        bail!("SetInputSettings failed (600): no input named {name}");
                    };
                    if let Some(settings) = data
                        .and_then(|map| map.get("inputSettings"))
                        .and_then(Value::as_object)
                    {
                        for (key, value) in settings {
                            input.settings.insert(key.clone(), value.clone());
                        }
                    }
                    Ok(json!({}))
                }
                "CreateSourceFilter" => {
                    let source = Self::str_arg(data, "sourceName")?;
                    if !self.inputs.contains_key(&source) {
                        bail!("CreateSourceFilter failed (600): no source named {source}");
                    }
                    let filter_name = Self::str_arg(data, "filterName")?;
                    let filter_kind = Self::str_arg(data, "filterKind")?;
                    let settings = data
                        .and_then(|map| map.get("filterSettings"))
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    self.filters.entry(source).or_default().push((
                        filter_name,
                        filter_kind,
                        settings,
                    ));
                    Ok(json!({}))
                }
                other => bail!("{other} failed (204): unknown request type"),
            }
        }
    }
}
