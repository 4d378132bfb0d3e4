/// COCO class names, the vocabulary of the MobileNetV2 + SSDLite export.
pub const COCO_CLASSES: &str = "person,bicycle,car,motorcycle,airplane,bus,train,truck,boat,\
traffic light,fire hydrant,stop sign,parking meter,bench,bird,cat,dog,horse,sheep,cow,\
elephant,bear,zebra,giraffe,backpack,umbrella,handbag,tie,suitcase,frisbee,skis,snowboard,\
sports ball,kite,baseball bat,baseball glove,skateboard,surfboard,tennis racket,bottle,\
wine glass,cup,fork,knife,spoon,bowl,banana,apple,sandwich,orange,broccoli,carrot,hot dog,\
pizza,donut,cake,chair,couch,potted plant,bed,dining table,toilet,tv,laptop,mouse,remote,\
keyboard,cell phone,microwave,oven,toaster,sink,refrigerator,book,clock,vase,scissors,\
teddy bear,hair drier,toothbrush";

/// Closed label vocabulary of a detection model, in class-index order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Parse the comma-separated `classes` string stored in model metadata.
    pub fn from_csv(csv: &str) -> Self {
        let labels = csv
            .split(',')
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.to_string())
            .collect();
        Self { labels }
    }

    pub fn coco() -> Self {
        Self::from_csv(COCO_CLASSES)
    }

    pub fn get(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<String> for LabelSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut labels: Vec<String> = Vec::new();
        for label in iter {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        Self { labels }
    }
}
