//! The four standard progress poses collected at challenge start and end.

pub struct Pose {
    pub name: &'static str,
    pub instruction: &'static str,
    pub tip: &'static str,
    /// Reference image shown with the prompt, resolved by the platform shim.
    pub example: &'static str,
}

pub const POSES: [Pose; 4] = [
    Pose {
        name: "Relaxed Front Pose",
        instruction: "Stand facing the camera, arms relaxed at your sides.",
        tip: "Keep your feet shoulder-width apart and look straight ahead.",
        example: "asset://poses/relaxed-front",
    },
    Pose {
        name: "Front Double Biceps",
        instruction: "Face the camera and flex both biceps.",
        tip: "Raise your elbows to shoulder height and squeeze.",
        example: "asset://poses/front-double-biceps",
    },
    Pose {
        name: "Rear Double Biceps",
        instruction: "Turn your back to the camera and flex both biceps.",
        tip: "Spread your lats while you flex for the full effect.",
        example: "asset://poses/rear-double-biceps",
    },
    Pose {
        name: "Relaxed Back Pose",
        instruction: "Back to the camera, arms relaxed at your sides.",
        tip: "Stand tall and let your shoulders drop naturally.",
        example: "asset://poses/relaxed-back",
    },
];
