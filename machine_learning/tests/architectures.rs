use machine_learning::{Architecture, ArchitectureTag, MlErr, build};
use ndarray::Array4;
use rand::{SeedableRng, rngs::StdRng};

const ALL_VARIANTS: [Architecture; 5] = [
    Architecture::EfficientNetB0Torchvision,
    Architecture::EfficientNetB0Timm,
    Architecture::EfficientNetB2Torchvision,
    Architecture::EfficientNetB2Timm,
    Architecture::ResNet18,
];

fn image(size: usize) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, size, size), |(_, c, i, j)| {
        ((c * 31 + i * 7 + j * 3) % 17) as f32 / 17.0 - 0.5
    })
}

#[test]
fn every_variant_outputs_the_requested_width() {
    let x = image(32);

    for (i, variant) in ALL_VARIANTS.into_iter().enumerate() {
        let num_classes = 3 + i * 50;
        let mut net = variant
            .build_with_rng(num_classes, &mut StdRng::seed_from_u64(i as u64))
            .unwrap();
        net.eval();

        assert_eq!(net.num_classes(), num_classes, "{variant}");
        assert_eq!(net.architecture(), variant);

        let logits = net.forward(x.view()).unwrap();
        assert_eq!(logits.dim(), (1, num_classes), "{variant}");
        assert!(logits.iter().all(|v| v.is_finite()), "{variant}");
    }
}

#[test]
fn build_uses_the_default_variant() {
    for tag in ArchitectureTag::ALL {
        let net = build(tag, 200).unwrap();
        assert_eq!(net.architecture(), tag.default_variant());
        assert_eq!(net.num_classes(), 200);
    }
}

#[test]
fn classifier_keys_follow_each_toolkit() {
    let keys: Vec<_> = ALL_VARIANTS
        .iter()
        .map(|v| v.build_shell(10).unwrap().classifier_key())
        .collect();

    assert_eq!(
        keys,
        ["classifier.1", "classifier", "classifier.1", "classifier", "fc"]
    );
}

#[test]
fn signature_prefixes_are_present_in_their_layouts() {
    for variant in ALL_VARIANTS {
        let net = variant.build_shell(10).unwrap();
        let prefix = variant.signature_prefix();
        assert!(
            net.param_specs().iter().any(|s| s.name.starts_with(prefix)),
            "{variant} has no {prefix} key"
        );
    }
}

#[test]
fn cross_layout_load_is_rejected() {
    let torchvision = Architecture::EfficientNetB0Torchvision.build_shell(10).unwrap();
    let mut timm = Architecture::EfficientNetB0Timm.build_shell(10).unwrap();

    let err = timm
        .load_state_dict(&torchvision.state_dict().unwrap())
        .unwrap_err();

    assert!(err.is_state_dict_mismatch());
    let MlErr::StateDict {
        missing, unexpected, ..
    } = err
    else {
        panic!("expected a state dict error");
    };
    assert!(missing.iter().any(|k| k == "conv_stem.weight"));
    assert!(unexpected.iter().any(|k| k == "features.0.0.weight"));
}

#[test]
fn b0_and_b2_do_not_share_shapes() {
    let b2 = Architecture::EfficientNetB2Torchvision.build_shell(10).unwrap();
    let mut b0 = Architecture::EfficientNetB0Torchvision.build_shell(10).unwrap();

    let err = b0.load_state_dict(&b2.state_dict().unwrap()).unwrap_err();
    assert!(err.is_state_dict_mismatch());
}
