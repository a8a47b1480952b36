use std::collections::HashMap;
use std::collections::hash_map::Entry;

use kube::api::{
    ApiResource,
    DynamicObject,
};
use kube::discovery::{
    ApiCapabilities,
    Scope,
};

use crate::k8s::GVK;

// An ApiSet caches the ApiResources returned by the apiserver so we don't
// have to repeat "discovery" calls on every admission request.
pub struct ApiSet {
    client: kube::Client,
    resources: HashMap<GVK, (ApiResource, ApiCapabilities)>,
    cluster_apis: HashMap<GVK, kube::Api<DynamicObject>>,
    namespaced_apis: HashMap<(GVK, String), kube::Api<DynamicObject>>,
}

impl ApiSet {
    pub fn new(client: kube::Client) -> ApiSet {
        ApiSet {
            client,
            resources: HashMap::new(),
            cluster_apis: HashMap::new(),
            namespaced_apis: HashMap::new(),
        }
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    // Look up an Api handle for the GVK, scoped into `ns` when discovery says
    // the resource is namespaced.
    pub async fn api_for(&mut self, gvk: &GVK, ns: &str) -> anyhow::Result<&kube::Api<DynamicObject>> {
        let (ar, cap) = self.api_meta_for(gvk).await?.clone();
        match cap.scope {
            Scope::Cluster => match self.cluster_apis.entry(gvk.clone()) {
                Entry::Occupied(e) => Ok(e.into_mut()),
                Entry::Vacant(e) => {
                    let api = kube::Api::all_with(self.client.clone(), &ar);
                    Ok(e.insert(api))
                },
            },
            Scope::Namespaced => match self.namespaced_apis.entry((gvk.clone(), ns.into())) {
                Entry::Occupied(e) => Ok(e.into_mut()),
                Entry::Vacant(e) => {
                    let api = kube::Api::namespaced_with(self.client.clone(), &e.key().1, &ar);
                    Ok(e.insert(api))
                },
            },
        }
    }

    async fn api_meta_for(&mut self, gvk: &GVK) -> anyhow::Result<&(ApiResource, ApiCapabilities)> {
        match self.resources.entry(gvk.clone()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let api_meta = kube::discovery::pinned_kind(&self.client, e.key()).await?;
                Ok(e.insert(api_meta))
            },
        }
    }
}
