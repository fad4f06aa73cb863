use dell_csi_operator::crd::{
    CSIIsilon, CSIPowerMax, CSIPowerMaxRevProxy, CSIPowerStore, CSIUnity, CSIVXFlexOS,
};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        CSIPowerMax::crd(),
        CSIIsilon::crd(),
        CSIUnity::crd(),
        CSIVXFlexOS::crd(),
        CSIPowerStore::crd(),
        CSIPowerMaxRevProxy::crd(),
    ];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
