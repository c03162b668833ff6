//! Sandbox primitives bound into a snippet's namespace.

use catalog::{Arguments, SearchQuery, ToolBinding, ToolDescriptor, ToolLoader, ToolRef};
use policy::{CapabilityKind, CapabilityRequest, Policy};
use script::{CallArgs, ExcKind, Exception, Host, HostFn, Interpreter, Value, from_json, to_json};
use serde_json::{Map, Value as Json};
use storage::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    ListServers,
    SearchTools,
    ListTools,
    LoadTool,
    SaveState,
    LoadState,
}

impl Primitive {
    const ALL: [Primitive; 6] = [
        Primitive::ListServers,
        Primitive::SearchTools,
        Primitive::ListTools,
        Primitive::LoadTool,
        Primitive::SaveState,
        Primitive::LoadState,
    ];

    fn name(self) -> &'static str {
        match self {
            Primitive::ListServers => "list_servers",
            Primitive::SearchTools => "search_tools",
            Primitive::ListTools => "list_tools",
            Primitive::LoadTool => "load_tool",
            Primitive::SaveState => "save_state",
            Primitive::LoadState => "load_state",
        }
    }

    fn capability(self) -> CapabilityKind {
        match self {
            Primitive::ListServers | Primitive::SearchTools | Primitive::ListTools => {
                CapabilityKind::Discover
            }
            Primitive::LoadTool => CapabilityKind::LoadTool,
            Primitive::SaveState => CapabilityKind::StateWrite,
            Primitive::LoadState => CapabilityKind::StateRead,
        }
    }

    fn from_handle(handle: usize) -> Option<Self> {
        Self::ALL.get(handle).copied()
    }
}

/// Tool bindings get handles after the primitives.
const FIRST_TOOL_HANDLE: usize = Primitive::ALL.len();

/// Backs the sandbox primitives for one execution.
pub(crate) struct SandboxHost<'a> {
    loader: &'a ToolLoader,
    policy: &'a Policy,
    session: &'a mut SessionState,
    bindings: Vec<ToolBinding>,
    /// Tools invoked during this execution, by first use.
    pub(crate) tools_used: Vec<ToolRef>,
    /// Characters of every raw tool output returned to the snippet.
    pub(crate) raw_output_chars: usize,
}

impl<'a> SandboxHost<'a> {
    pub(crate) fn new(
        loader: &'a ToolLoader,
        policy: &'a Policy,
        session: &'a mut SessionState,
    ) -> Self {
        Self {
            loader,
            policy,
            session,
            bindings: Vec::new(),
            tools_used: Vec::new(),
            raw_output_chars: 0,
        }
    }

    /// Bind the primitives the policy exposes. Withheld ones are simply
    /// absent, so using them is a `NameError`.
    pub(crate) fn install(policy: &Policy, interp: &mut Interpreter<'_>) {
        for (handle, primitive) in Primitive::ALL.into_iter().enumerate() {
            if policy.exposes(primitive.capability()) {
                interp.bind_host(primitive.name(), HostFn::new(primitive.name(), handle));
            }
        }
        if !policy.exposes(CapabilityKind::Print) {
            interp.unbind("print");
        }
    }

    fn primitive(&mut self, primitive: Primitive, args: CallArgs) -> script::Result<Value> {
        let name = primitive.name();
        match primitive {
            Primitive::ListServers => {
                args.bind(name, [], 0)?;
                let servers = self.loader.catalog().list_servers();
                Ok(Value::list(servers.into_iter().map(Value::str).collect()))
            }
            Primitive::SearchTools => {
                let [query, category, server, limit] =
                    args.bind(name, ["query", "category", "server", "limit"], 0)?;
                let mut search = SearchQuery::new(optional_str(name, query)?.unwrap_or_default());
                if let Some(category) = optional_str(name, category)? {
                    search = search.category(category);
                }
                if let Some(server) = optional_str(name, server)? {
                    search = search.server(server);
                }
                if let Some(limit) = limit.filter(|v| !v.is_none()) {
                    let limit = limit
                        .as_int()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            Exception::type_error("search_tools() limit must be a non-negative int")
                        })?;
                    search = search.limit(limit);
                }
                descriptors(&self.loader.catalog().search(&search))
            }
            Primitive::ListTools => {
                let [server] = args.bind(name, ["server"], 1)?;
                let server = required_str(name, server)?;
                descriptors(&self.loader.catalog().list_tools(&server))
            }
            Primitive::LoadTool => {
                let [server, tool] = args.bind(name, ["server", "name"], 2)?;
                let server = required_str(name, server)?;
                let tool = required_str(name, tool)?;
                self.policy
                    .check(&CapabilityRequest::load_tool(&server, &tool))
                    .into_result()
                    .map_err(denied)?;
                let binding = self.loader.load_tool(&server, &tool).map_err(tool_error)?;
                let handle = FIRST_TOOL_HANDLE + self.bindings.len();
                let func = HostFn::new(binding.tool_ref().to_string(), handle);
                self.bindings.push(binding);
                Ok(Value::Host(func))
            }
            Primitive::SaveState => {
                let [key, value] = args.bind(name, ["key", "value"], 2)?;
                let key = required_str(name, key)?;
                self.policy
                    .check(&CapabilityRequest::state_write(&key))
                    .into_result()
                    .map_err(denied)?;
                let json = to_json(&value.unwrap_or_default())?;
                tracing::debug!(session = %self.session.id, key = %key, "saved state");
                self.session.save(key, json);
                Ok(Value::None)
            }
            Primitive::LoadState => {
                let [key, default] = args.bind(name, ["key", "default"], 1)?;
                let key = required_str(name, key)?;
                self.policy
                    .check(&CapabilityRequest::state_read(&key))
                    .into_result()
                    .map_err(denied)?;
                Ok(match self.session.state.get(&key) {
                    Some(json) => from_json(json),
                    None => default.unwrap_or_default(),
                })
            }
        }
    }

    fn invoke(&mut self, index: usize, args: CallArgs) -> script::Result<Value> {
        let Some(binding) = self.bindings.get(index) else {
            return Err(Exception::new(ExcKind::RuntimeError, "stale tool handle"));
        };
        let arguments = tool_arguments(binding.descriptor(), args)?;
        let tool = binding.tool_ref();
        let output = binding.invoke(&arguments).map_err(tool_error)?;

        self.raw_output_chars += json_chars(&output);
        if !self.tools_used.contains(&tool) {
            self.tools_used.push(tool.clone());
        }
        tracing::debug!(session = %self.session.id, %tool, "invoked tool");
        self.session.record_invocation(tool);
        Ok(from_json(&output))
    }
}

impl Host for SandboxHost<'_> {
    fn call(&mut self, func: &HostFn, args: CallArgs) -> script::Result<Value> {
        match Primitive::from_handle(func.handle) {
            Some(primitive) => self.primitive(primitive, args),
            None => self.invoke(func.handle - FIRST_TOOL_HANDLE, args),
        }
    }
}

/// Character length of the compact JSON form.
pub(crate) fn json_chars(value: &Json) -> usize {
    value.to_string().chars().count()
}

/// Map a call onto keyword arguments. Positional arguments fill the
/// descriptor's parameters in declaration order.
fn tool_arguments(descriptor: &ToolDescriptor, args: CallArgs) -> script::Result<Arguments> {
    let tool = descriptor.tool_ref();
    if args.positional.len() > descriptor.parameters.len() {
        return Err(Exception::new(
            ExcKind::ToolInvocationError,
            format!(
                "{tool} takes {} arguments but {} were given",
                descriptor.parameters.len(),
                args.positional.len()
            ),
        ));
    }

    let mut map = Map::new();
    let named = descriptor
        .parameters
        .iter()
        .map(|p| p.name.clone())
        .zip(args.positional);
    for (name, value) in named.chain(args.keywords) {
        let json = to_json(&value).map_err(|e| {
            Exception::new(
                ExcKind::ToolInvocationError,
                format!("argument '{name}' for {tool}: {}", e.message),
            )
        })?;
        if map.insert(name.clone(), json).is_some() {
            return Err(Exception::new(
                ExcKind::ToolInvocationError,
                format!("{tool} got multiple values for argument '{name}'"),
            ));
        }
    }
    Ok(Arguments(map))
}

fn descriptors(found: &[ToolDescriptor]) -> script::Result<Value> {
    let json = serde_json::to_value(found)
        .map_err(|e| Exception::new(ExcKind::RuntimeError, e.to_string()))?;
    Ok(from_json(&json))
}

fn tool_error(err: catalog::Error) -> Exception {
    let kind = match err {
        catalog::Error::ToolNotFound(_) => ExcKind::ToolNotFoundError,
        _ => ExcKind::ToolInvocationError,
    };
    Exception::new(kind, err.to_string())
}

fn denied(err: policy::Error) -> Exception {
    match err {
        policy::Error::Denied(reason) => Exception::new(ExcKind::CapabilityError, reason),
        other => Exception::new(ExcKind::RuntimeError, other.to_string()),
    }
}

fn required_str(func: &str, value: Option<Value>) -> script::Result<String> {
    optional_str(func, value)?
        .ok_or_else(|| Exception::type_error(format!("{func}() argument must be str, not None")))
}

fn optional_str(func: &str, value: Option<Value>) -> script::Result<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.to_string())),
        Some(other) => Err(Exception::type_error(format!(
            "{func}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{Catalog, ParamKind, ParamSpec, ToolFailure};
    use serde_json::json;
    use std::sync::Arc;

    fn loader() -> ToolLoader {
        let catalog = Catalog::builder()
            .with(
                ToolDescriptor::new("geo", "distance", "Distance between two ports")
                    .with_param(ParamSpec::required("from", ParamKind::String))
                    .with_param(ParamSpec::required("to", ParamKind::String)),
                |args| Ok(json!({"from": args.require_str("from")?, "to": args.require_str("to")?, "nm": 120})),
            )
            .unwrap()
            .with(ToolDescriptor::new("geo", "broken", "Always fails"), |_| {
                Err(ToolFailure::new("upstream unavailable"))
            })
            .unwrap()
            .build();
        ToolLoader::new(Arc::new(catalog))
    }

    fn run(policy: &Policy, session: &mut SessionState, src: &str) -> (script::Result<Json>, Vec<ToolRef>, usize) {
        let loader = loader();
        let program = script::parse(src).unwrap();
        let mut host = SandboxHost::new(&loader, policy, session);
        let outcome = {
            let mut interp = Interpreter::new(&mut host, script::Limits::default());
            SandboxHost::install(policy, &mut interp);
            interp
                .run(&program)
                .and_then(|()| to_json(&interp.global("result").unwrap_or_default()))
        };
        (outcome, host.tools_used, host.raw_output_chars)
    }

    #[test]
    fn positional_arguments_follow_parameter_order() {
        let mut session = SessionState::new("t".into());
        let (out, used, raw) = run(
            &Policy::permissive(),
            &mut session,
            "d = load_tool('geo', 'distance')\nresult = d('Valletta', to='Tunis')",
        );
        assert_eq!(out.unwrap(), json!({"from": "Valletta", "to": "Tunis", "nm": 120}));
        assert_eq!(used, vec![ToolRef::new("geo", "distance")]);
        assert!(raw > 0);
        assert_eq!(session.tool_invocations.len(), 1);
    }

    #[test]
    fn tool_failures_are_catchable() {
        let mut session = SessionState::new("t".into());
        let src = "
            try:
                load_tool('geo', 'broken')()
            except ToolInvocationError as e:
                result = str(e)
            try:
                load_tool('geo', 'nope')
            except ToolNotFoundError:
                result = [result, 'missing']
        ";
        let (out, used, _) = run(&Policy::permissive(), &mut session, src);
        assert_eq!(
            out.unwrap(),
            json!(["geo/broken failed: upstream unavailable", "missing"])
        );
        assert!(used.is_empty());
    }

    #[test]
    fn state_round_trips_through_the_session() {
        let mut session = SessionState::new("t".into());
        let (out, _, _) = run(
            &Policy::permissive(),
            &mut session,
            "save_state('favs', {'ports': ['Valletta'], 'n': 2})\nresult = load_state('favs')['n'] + load_state('other', 40)",
        );
        assert_eq!(out.unwrap(), json!(42));
        assert_eq!(session.state["favs"], json!({"ports": ["Valletta"], "n": 2}));
    }

    #[test]
    fn unserializable_state_is_rejected() {
        let mut session = SessionState::new("t".into());
        let (out, _, _) = run(&Policy::permissive(), &mut session, "save_state('f', len)");
        assert_eq!(out.unwrap_err().kind, ExcKind::StateSerializationError);
        assert!(session.state.is_empty());
    }

    #[test]
    fn read_only_policy_withholds_writes_and_loads() {
        let mut session = SessionState::new("t".into());
        let (out, _, _) = run(&Policy::read_only(), &mut session, "save_state('k', 1)");
        assert_eq!(out.unwrap_err().kind, ExcKind::NameError);

        let (out, _, _) = run(&Policy::read_only(), &mut session, "result = list_servers()");
        assert_eq!(out.unwrap(), json!(["geo"]));
    }

    #[test]
    fn denied_tool_raises_capability_error() {
        let policy = Policy::parse("[deny]\ntools = [\"geo/broken\"]\n").unwrap();
        let mut session = SessionState::new("t".into());
        let (out, _, _) = run(&policy, &mut session, "load_tool('geo', 'broken')");
        assert_eq!(out.unwrap_err().kind, ExcKind::CapabilityError);
    }

    #[test]
    fn discovery_returns_descriptor_dicts() {
        let mut session = SessionState::new("t".into());
        let (out, _, _) = run(
            &Policy::permissive(),
            &mut session,
            "result = [t['name'] for t in search_tools('fail')] + [len(list_tools('geo'))]",
        );
        assert_eq!(out.unwrap(), json!(["broken", 2]));
    }
}
