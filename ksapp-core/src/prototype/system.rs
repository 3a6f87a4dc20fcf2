//! Built-in prototypes available in every app

use super::Prototype;
use crate::error::Result;

const NAMESPACE: &str = r#"// @apiVersion 0.1.0
// @name io.ksonnet.pkg.namespace
// @description A simple namespace. Labels are automatically populated from the name of the
//   namespace.
// @shortDescription Namespace with labels automatically populated from the name
// @param name string Name to give the namespace
{
  apiVersion: "v1",
  kind: "Namespace",
  metadata: {
    name: params.name,
    labels: {
      name: params.name,
    },
  },
}
"#;

const CONFIG_MAP: &str = r#"// @apiVersion 0.1.0
// @name io.ksonnet.pkg.configMap
// @description A simple config map with optional user-specified data.
// @shortDescription A simple config map with optional user-specified data
// @param name string Name to give the configMap
// @optionalParam data object {} Data for the configMap
{
  apiVersion: "v1",
  kind: "ConfigMap",
  metadata: {
    name: params.name,
  },
  data: params.data,
}
"#;

const SINGLE_PORT_DEPLOYMENT: &str = r#"// @apiVersion 0.1.0
// @name io.ksonnet.pkg.single-port-deployment
// @description A deployment that replicates container `image` some number of times
//   (default: 1), and exposes a port (default: 80). Labels are automatically
//   populated from `name`.
// @shortDescription Replicates a container n times, exposes a single port
// @param name string Name of the deployment
// @param image string Container image to deploy
// @optionalParam replicas number 1 Number of replicas
// @optionalParam port number 80 Port to expose
local labels = { app: params.name };
{
  apiVersion: "apps/v1beta1",
  kind: "Deployment",
  metadata: {
    name: params.name,
  },
  spec: {
    replicas: params.replicas,
    template: {
      metadata: { labels: labels },
      spec: {
        containers: [
          {
            name: params.name,
            image: params.image,
            ports: [{ containerPort: params.port }],
          },
        ],
      },
    },
  },
}
"#;

const DEPLOYED_SERVICE: &str = r#"// @apiVersion 0.1.0
// @name io.ksonnet.pkg.deployed-service
// @description A service that exposes `image` on `servicePort`, with
//   `containerPort` as the target port of the deployment's containers.
// @shortDescription A deployment exposed with a service
// @param name string Name of the service and deployment
// @param image string Container image to deploy
// @optionalParam servicePort number 80 Port for the service to expose
// @optionalParam containerPort number 80 Container port for the service to target
// @optionalParam replicas number 1 Number of replicas
// @optionalParam type string ClusterIP Type of service to expose
local labels = { app: params.name };
[
  {
    apiVersion: "v1",
    kind: "Service",
    metadata: { name: params.name },
    spec: {
      ports: [{ port: params.servicePort, targetPort: params.containerPort }],
      selector: labels,
      type: params.type,
    },
  },
  {
    apiVersion: "apps/v1beta2",
    kind: "Deployment",
    metadata: { name: params.name },
    spec: {
      replicas: params.replicas,
      selector: { matchLabels: labels },
      template: {
        metadata: { labels: labels },
        spec: {
          containers: [
            {
              name: params.name,
              image: params.image,
              ports: [{ containerPort: params.containerPort }],
            },
          ],
        },
      },
    },
  },
]
"#;

const SOURCES: [(&str, &str); 4] = [
    ("namespace", NAMESPACE),
    ("configMap", CONFIG_MAP),
    ("single-port-deployment", SINGLE_PORT_DEPLOYMENT),
    ("deployed-service", DEPLOYED_SERVICE),
];

/// The built-in prototypes
pub fn prototypes() -> Result<Vec<Prototype>> {
    SOURCES
        .iter()
        .map(|(source_name, source)| Prototype::parse(source_name, source))
        .collect()
}
