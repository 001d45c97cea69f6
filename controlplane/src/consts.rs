// Domain under which every annotation, finalizer and API group of this project lives.
pub const LBGATE_DOMAIN: &str = "lbgate.gateway.networking.k8s.io";

// Controller name for the lbgate GatewayClass.
pub const GATEWAY_CLASS_CONTROLLER_NAME: &str = "lbgate.gateway.networking.k8s.io/lbgate-controller";

// Field manager for lbgate.
pub const LBGATE_FIELD_MANAGER: &str = "lbgate-field-manager";

// Bumped whenever the way Gateways are projected onto the load balancer changes, so that
// already programmed Gateways get programmed again.
pub const PROGRAMMING_REVISION: &str = "1";

pub const PROGRAMMING_REVISION_ANNOTATION: &str =
    "lbgate.gateway.networking.k8s.io/programming-revision";

// JSON object mapping `<namespace>/<name>` of each referenced Secret to its resourceVersion.
pub const USED_SECRETS_ANNOTATION: &str = "lbgate.gateway.networking.k8s.io/used-secrets";

// JSON object mapping `<namespace>/<name>` of each referenced Service to its resourceVersion.
pub const USED_SERVICES_ANNOTATION: &str = "lbgate.gateway.networking.k8s.io/used-services";

// Comma separated names of the routing rules programmed for an HTTPRoute.
pub const PROGRAMMED_RULES_ANNOTATION: &str = "lbgate.gateway.networking.k8s.io/programmed-rules";

// Comma separated ids of the load balancers an HTTPRoute has rules on.
pub const PROGRAMMED_LOAD_BALANCERS_ANNOTATION: &str =
    "lbgate.gateway.networking.k8s.io/programmed-load-balancers";

// The finalizer used to remove routing rules of deleted HTTPRoutes.
pub const HTTPROUTE_FINALIZER: &str = "lbgate.gateway.networking.k8s.io/httproute-cleanup";

// Label set by Kubernetes on EndpointSlices that belong to a Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_PROGRAMMED: &str = "Programmed";
pub const CONDITION_RESOLVED_REFS: &str = "ResolvedRefs";

pub const REASON_ACCEPTED: &str = "Accepted";
pub const REASON_PROGRAMMED: &str = "Programmed";
pub const REASON_RESOLVED_REFS: &str = "ResolvedRefs";
pub const REASON_INVALID: &str = "Invalid";
pub const REASON_INVALID_PARAMETERS: &str = "InvalidParameters";
pub const REASON_LISTENERS_NOT_VALID: &str = "ListenersNotValid";
pub const REASON_UNSUPPORTED_VALUE: &str = "UnsupportedValue";
pub const REASON_BACKEND_NOT_FOUND: &str = "BackendNotFound";
pub const REASON_REF_NOT_PERMITTED: &str = "RefNotPermitted";
pub const REASON_INVALID_KIND: &str = "InvalidKind";
